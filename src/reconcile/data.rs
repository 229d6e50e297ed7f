//! Typed desired state of one resource instance.

/// Field values presented for one lifecycle call.
///
/// Holds the backend identifier, the previously persisted fields (`prior`)
/// and the requested fields. Reads write remote values into the requested
/// fields, which then become what the host persists.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceData<F> {
    id: String,
    prior: F,
    fields: F,
}

impl<F: Clone + Default> ResourceData<F> {
    /// State for a resource that does not exist yet.
    #[must_use]
    pub fn new(fields: F) -> Self {
        Self {
            id: String::new(),
            prior: F::default(),
            fields,
        }
    }

    /// State for an existing resource with no pending change.
    #[must_use]
    pub fn existing(id: impl Into<String>, fields: F) -> Self {
        Self {
            id: id.into(),
            prior: fields.clone(),
            fields,
        }
    }

    /// State for an existing resource moving from `prior` to `fields`.
    #[must_use]
    pub fn changed(id: impl Into<String>, prior: F, fields: F) -> Self {
        Self {
            id: id.into(),
            prior,
            fields,
        }
    }
}

impl<F> ResourceData<F> {
    /// Returns the backend identifier, empty when absent.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sets the backend identifier; an empty string marks the instance absent.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Returns true if the instance is absent.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.id.is_empty()
    }

    /// Returns the requested fields.
    #[must_use]
    pub const fn get(&self) -> &F {
        &self.fields
    }

    /// Returns the previously persisted fields.
    #[must_use]
    pub const fn prior(&self) -> &F {
        &self.prior
    }

    /// Returns `(old, new)` for one field.
    pub fn get_change<'a, T>(&'a self, field: impl Fn(&'a F) -> &'a T) -> (&'a T, &'a T) {
        (field(&self.prior), field(&self.fields))
    }

    /// Returns true if one field differs between prior and requested state.
    pub fn has_change<'a, T: PartialEq + 'a>(&'a self, field: impl Fn(&'a F) -> &'a T) -> bool {
        let (old, new) = self.get_change(field);
        old != new
    }

    /// Mutable access for identifier and computed-field write-back.
    pub const fn fields_mut(&mut self) -> &mut F {
        &mut self.fields
    }

    /// Consumes the state, returning identifier and fields.
    #[must_use]
    pub fn into_parts(self) -> (String, F) {
        (self.id, self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Sample {
        name: String,
        size: u32,
    }

    #[test]
    fn test_change_tracking() {
        let prior = Sample {
            name: String::from("a"),
            size: 1,
        };
        let fields = Sample {
            name: String::from("a"),
            size: 2,
        };
        let data = ResourceData::changed("id-1", prior, fields);

        assert!(!data.has_change(|f| &f.name));
        assert!(data.has_change(|f| &f.size));
        assert_eq!(data.get_change(|f| &f.size), (&1, &2));
    }

    #[test]
    fn test_new_is_absent_until_id_set() {
        let mut data = ResourceData::new(Sample::default());
        assert!(data.is_absent());
        data.set_id("id-1");
        assert_eq!(data.id(), "id-1");
        data.fields_mut().size = 5;
        assert_eq!(data.into_parts(), (String::from("id-1"), Sample {
            name: String::new(),
            size: 5,
        }));
    }
}
