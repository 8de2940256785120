//! Corrected layouts for events whose in-trace metadata is known to ship
//! with an empty name and no field definitions. Keyed by
//! `(provider_name, event_id, version)`.

use crate::trace::FieldTypeCode;

pub(crate) const RUNTIME_PROVIDER: &str = "Microsoft-Windows-DotNETRuntime";
pub(crate) const RUNDOWN_PROVIDER: &str = "Microsoft-Windows-DotNETRuntimeRundown";

/// Event id of the verbose method load/unload template in both the runtime
/// and rundown providers; rundown occurrences feed the symbol resolver.
pub(crate) const METHOD_VERBOSE_EVENT_ID: u32 = 144;
pub(crate) const METHOD_VERBOSE_START_EVENT_ID: u32 = 143;

pub(crate) const FIELD_METHOD_START_ADDRESS: &str = "MethodStartAddress";
pub(crate) const FIELD_METHOD_SIZE: &str = "MethodSize";
pub(crate) const FIELD_METHOD_NAMESPACE: &str = "MethodNamespace";
pub(crate) const FIELD_METHOD_NAME: &str = "MethodName";
pub(crate) const FIELD_METHOD_SIGNATURE: &str = "MethodSignature";
pub(crate) const FIELD_MODULE_ID: &str = "ModuleID";

pub(crate) struct KnownField {
    pub name: &'static str,
    pub type_code: FieldTypeCode,
}

pub(crate) struct KnownEventLayout {
    pub event_name: &'static str,
    pub fields: &'static [KnownField],
}

const fn field(name: &'static str, type_code: FieldTypeCode) -> KnownField {
    KnownField { name, type_code }
}

const METHOD_VERBOSE_V0: &[KnownField] = &[
    field("MethodID", FieldTypeCode::UInt64),
    field(FIELD_MODULE_ID, FieldTypeCode::UInt64),
    field(FIELD_METHOD_START_ADDRESS, FieldTypeCode::UInt64),
    field(FIELD_METHOD_SIZE, FieldTypeCode::UInt32),
    field("MethodToken", FieldTypeCode::UInt32),
    field("MethodFlags", FieldTypeCode::UInt32),
    field(FIELD_METHOD_NAMESPACE, FieldTypeCode::String),
    field(FIELD_METHOD_NAME, FieldTypeCode::String),
    field(FIELD_METHOD_SIGNATURE, FieldTypeCode::String),
];

const METHOD_VERBOSE_V1: &[KnownField] = &[
    field("MethodID", FieldTypeCode::UInt64),
    field(FIELD_MODULE_ID, FieldTypeCode::UInt64),
    field(FIELD_METHOD_START_ADDRESS, FieldTypeCode::UInt64),
    field(FIELD_METHOD_SIZE, FieldTypeCode::UInt32),
    field("MethodToken", FieldTypeCode::UInt32),
    field("MethodFlags", FieldTypeCode::UInt32),
    field(FIELD_METHOD_NAMESPACE, FieldTypeCode::String),
    field(FIELD_METHOD_NAME, FieldTypeCode::String),
    field(FIELD_METHOD_SIGNATURE, FieldTypeCode::String),
    field("ClrInstanceID", FieldTypeCode::UInt16),
];

const METHOD_VERBOSE_V2: &[KnownField] = &[
    field("MethodID", FieldTypeCode::UInt64),
    field(FIELD_MODULE_ID, FieldTypeCode::UInt64),
    field(FIELD_METHOD_START_ADDRESS, FieldTypeCode::UInt64),
    field(FIELD_METHOD_SIZE, FieldTypeCode::UInt32),
    field("MethodToken", FieldTypeCode::UInt32),
    field("MethodFlags", FieldTypeCode::UInt32),
    field(FIELD_METHOD_NAMESPACE, FieldTypeCode::String),
    field(FIELD_METHOD_NAME, FieldTypeCode::String),
    field(FIELD_METHOD_SIGNATURE, FieldTypeCode::String),
    field("ClrInstanceID", FieldTypeCode::UInt16),
    field("ReJITID", FieldTypeCode::UInt64),
];

fn method_verbose_fields(version: u32) -> Option<&'static [KnownField]> {
    match version {
        0 => Some(METHOD_VERBOSE_V0),
        1 => Some(METHOD_VERBOSE_V1),
        2 => Some(METHOD_VERBOSE_V2),
        _ => None,
    }
}

pub(crate) fn lookup(provider: &str, event_id: u32, version: u32) -> Option<KnownEventLayout> {
    let event_name = match (provider, event_id) {
        (RUNTIME_PROVIDER, METHOD_VERBOSE_START_EVENT_ID) => "MethodLoadVerbose",
        (RUNTIME_PROVIDER, METHOD_VERBOSE_EVENT_ID) => "MethodUnloadVerbose",
        (RUNDOWN_PROVIDER, METHOD_VERBOSE_START_EVENT_ID) => "MethodDCStartVerbose",
        (RUNDOWN_PROVIDER, METHOD_VERBOSE_EVENT_ID) => "MethodDCEndVerbose",
        _ => return None,
    };
    Some(KnownEventLayout {
        event_name,
        fields: method_verbose_fields(version)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rundown_method_layouts_by_version() {
        let v1 = lookup(RUNDOWN_PROVIDER, 144, 1).unwrap();
        assert_eq!(v1.event_name, "MethodDCEndVerbose");
        assert_eq!(v1.fields.len(), 10);
        assert_eq!(v1.fields[9].name, "ClrInstanceID");

        let v2 = lookup(RUNDOWN_PROVIDER, 144, 2).unwrap();
        assert_eq!(v2.fields.len(), 11);
        assert_eq!(v2.fields[10].name, "ReJITID");
    }

    #[test]
    fn unknown_entries_are_not_overridden() {
        assert!(lookup("System.Threading.Tasks.TplEventSource", 10, 3).is_none());
        assert!(lookup(RUNDOWN_PROVIDER, 144, 7).is_none());
        assert!(lookup(RUNDOWN_PROVIDER, 145, 1).is_none());
    }
}
