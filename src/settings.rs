use crate::error::Error;

/// Process-scoped configuration (§6 "Configuration").
///
/// Owned by the embedding application and passed in; this crate owns no
/// CLI, environment-variable, or file-format surface of its own.
#[derive(Clone, Debug)]
pub struct Settings {
    pub service_namespace: String,
    pub etcd_ttl: i64,
}

impl Settings {
    pub fn new(service_namespace: impl Into<String>, etcd_ttl: i64) -> Result<Self, Error> {
        let service_namespace = service_namespace.into();
        if service_namespace.is_empty()
            || service_namespace.starts_with('/')
            || service_namespace.ends_with('/')
        {
            return Err(Error::InvalidIdentifier(service_namespace));
        }
        Ok(Self {
            service_namespace,
            etcd_ttl,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_namespace: "services".to_string(),
            etcd_ttl: 30,
        }
    }
}
