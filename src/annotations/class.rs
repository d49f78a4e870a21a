// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ingress class filtering.

use crate::labels::INGRESS_CLASS;
use k8s_openapi::api::networking::v1::Ingress;

/// Decides which `Ingress` objects this controller manages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressClassFilter {
    /// Class configured for this controller, `None` when unset
    pub class: Option<String>,
    /// Class assumed for rules that do not name one
    pub default_class: String,
}

impl IngressClassFilter {
    #[must_use]
    pub fn new(class: Option<String>, default_class: impl Into<String>) -> Self {
        Self {
            class: class.filter(|c| !c.is_empty()),
            default_class: default_class.into(),
        }
    }

    /// Returns true if the rule belongs to this controller.
    ///
    /// A rule without a class is managed only when the controller runs the default
    /// class. A rule naming a class is managed when it equals the configured class, or
    /// the default class when none is configured.
    #[must_use]
    pub fn is_managed(&self, ing: &Ingress) -> bool {
        let rule_class = ing
            .metadata
            .annotations
            .as_ref()
            .and_then(|anns| anns.get(INGRESS_CLASS))
            .cloned()
            .or_else(|| {
                ing.spec
                    .as_ref()
                    .and_then(|spec| spec.ingress_class_name.clone())
            })
            .filter(|c| !c.is_empty());

        let controller_class = self.class.as_deref().unwrap_or(&self.default_class);
        match rule_class {
            None => controller_class == self.default_class,
            Some(rule_class) => rule_class == controller_class,
        }
    }
}

impl Default for IngressClassFilter {
    fn default() -> Self {
        Self::new(None, crate::constants::DEFAULT_INGRESS_CLASS)
    }
}
