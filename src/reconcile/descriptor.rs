//! Static per-type resource descriptions.

use serde::Serialize;
use std::fmt;

/// How a field's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain value.
    Scalar,
    /// Backend identifier of another object.
    Identifier,
    /// Name standing in for an identifier field.
    NameAlias,
    /// Unordered collection; order never matters for equality.
    Set,
    /// Ordered list of sub-objects.
    List,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scalar => "scalar",
            Self::Identifier => "identifier",
            Self::NameAlias => "name",
            Self::Set => "set",
            Self::List => "list",
        };
        write!(f, "{s}")
    }
}

/// One field of a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// Field kind.
    pub kind: FieldKind,
    /// Must be supplied by configuration.
    pub required: bool,
    /// A change requires recreating the resource.
    pub force_new: bool,
    /// Only ever written by reads.
    pub computed: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            force_new: false,
            computed: false,
        }
    }

    /// A scalar field.
    #[must_use]
    pub const fn scalar(name: &'static str) -> Self {
        Self::new(name, FieldKind::Scalar)
    }

    /// An identifier field.
    #[must_use]
    pub const fn identifier(name: &'static str) -> Self {
        Self::new(name, FieldKind::Identifier)
    }

    /// A name alias of an identifier field.
    #[must_use]
    pub const fn name_alias(name: &'static str) -> Self {
        Self::new(name, FieldKind::NameAlias)
    }

    /// An unordered set field.
    #[must_use]
    pub const fn set(name: &'static str) -> Self {
        Self::new(name, FieldKind::Set)
    }

    /// An ordered list field.
    #[must_use]
    pub const fn list(name: &'static str) -> Self {
        Self::new(name, FieldKind::List)
    }

    /// Marks the field required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field force-new.
    #[must_use]
    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Marks the field computed.
    #[must_use]
    pub const fn computed(mut self) -> Self {
        self.computed = true;
        self
    }
}

/// Static description of one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    /// Type tag, e.g. `security_group`.
    pub type_tag: &'static str,
    /// Fields of the type.
    pub fields: &'static [FieldSpec],
}

impl ResourceDescriptor {
    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if changing `name` requires recreating the resource.
    #[must_use]
    pub fn is_force_new(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.force_new)
    }

    /// Required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Fields that configuration may set.
    pub fn writable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: ResourceDescriptor = ResourceDescriptor {
        type_tag: "sample",
        fields: &[
            FieldSpec::scalar("name").required(),
            FieldSpec::identifier("zone_id").force_new(),
            FieldSpec::name_alias("zone_name").force_new(),
            FieldSpec::scalar("cidr").computed(),
        ],
    };

    #[test]
    fn test_lookup_and_flags() {
        assert!(SAMPLE.is_force_new("zone_id"));
        assert!(!SAMPLE.is_force_new("name"));
        assert!(!SAMPLE.is_force_new("unknown"));
        assert_eq!(SAMPLE.field("zone_name").map(|f| f.kind), Some(FieldKind::NameAlias));
        assert_eq!(SAMPLE.required_fields().count(), 1);
        assert_eq!(SAMPLE.writable_fields().count(), 3);
    }
}
