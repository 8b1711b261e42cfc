use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Patch kinds the attached runtime advertises it can apply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct EditAndContinueCapabilities: u32 {
        const BASELINE = 1 << 0;
        const ADD_METHOD_TO_EXISTING_TYPE = 1 << 1;
        const ADD_STATIC_FIELD_TO_EXISTING_TYPE = 1 << 2;
        const ADD_INSTANCE_FIELD_TO_EXISTING_TYPE = 1 << 3;
        const NEW_TYPE_DEFINITION = 1 << 4;
        const CHANGE_CUSTOM_ATTRIBUTES = 1 << 5;
        const UPDATE_PARAMETERS = 1 << 6;
        const GENERIC_ADD_METHOD_TO_EXISTING_TYPE = 1 << 7;
        const GENERIC_UPDATE_METHOD = 1 << 8;
        const GENERIC_ADD_FIELD_TO_EXISTING_TYPE = 1 << 9;
        const ADD_EXPLICIT_INTERFACE_IMPLEMENTATION = 1 << 10;
        const ADD_FIELD_RVA = 1 << 11;
    }
}

const NAMES: &[(&str, EditAndContinueCapabilities)] = &[
    ("Baseline", EditAndContinueCapabilities::BASELINE),
    (
        "AddMethodToExistingType",
        EditAndContinueCapabilities::ADD_METHOD_TO_EXISTING_TYPE,
    ),
    (
        "AddStaticFieldToExistingType",
        EditAndContinueCapabilities::ADD_STATIC_FIELD_TO_EXISTING_TYPE,
    ),
    (
        "AddInstanceFieldToExistingType",
        EditAndContinueCapabilities::ADD_INSTANCE_FIELD_TO_EXISTING_TYPE,
    ),
    (
        "NewTypeDefinition",
        EditAndContinueCapabilities::NEW_TYPE_DEFINITION,
    ),
    (
        "ChangeCustomAttributes",
        EditAndContinueCapabilities::CHANGE_CUSTOM_ATTRIBUTES,
    ),
    (
        "UpdateParameters",
        EditAndContinueCapabilities::UPDATE_PARAMETERS,
    ),
    (
        "GenericAddMethodToExistingType",
        EditAndContinueCapabilities::GENERIC_ADD_METHOD_TO_EXISTING_TYPE,
    ),
    (
        "GenericUpdateMethod",
        EditAndContinueCapabilities::GENERIC_UPDATE_METHOD,
    ),
    (
        "GenericAddFieldToExistingType",
        EditAndContinueCapabilities::GENERIC_ADD_FIELD_TO_EXISTING_TYPE,
    ),
    (
        "AddExplicitInterfaceImplementation",
        EditAndContinueCapabilities::ADD_EXPLICIT_INTERFACE_IMPLEMENTATION,
    ),
    ("AddFieldRva", EditAndContinueCapabilities::ADD_FIELD_RVA),
];

impl EditAndContinueCapabilities {
    /// Parses the capability names reported by the runtime. Unknown names are
    /// ignored so newer runtimes keep working.
    pub fn parse<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut caps = Self::empty();
        for name in names {
            let name = name.trim();
            match NAMES.iter().find(|(known, _)| *known == name) {
                Some((_, flag)) => caps |= *flag,
                None if name.is_empty() => {}
                None => {
                    tracing::debug!(
                        target: "nova.enc",
                        capability = name,
                        "ignoring unknown runtime capability"
                    );
                }
            }
        }
        caps
    }

    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}
