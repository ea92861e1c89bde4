use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("creating SSM activation: {0}")]
    Broker(String),

    #[error("SSM activation response is missing the `{0}`")]
    MissingField(&'static str),
}

/// One-time credentials allowing an instance to register itself as an SSM managed instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Activation {
    pub id: String,
    pub code: String,
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("id", &self.id)
            .field("code", &"<redacted>")
            .finish()
    }
}

/// Creates SSM hybrid activations.
///
/// Registering is NOT idempotent: every call creates a new activation, so callers must not
/// retry blindly on ambiguous failures.
pub trait ActivationRegistrar {
    fn register_activation(&self, role: &str, name: &str) -> Result<Activation, RegistrationError>;
}

impl<T> ActivationRegistrar for &T
where
    T: ActivationRegistrar + ?Sized,
{
    fn register_activation(&self, role: &str, name: &str) -> Result<Activation, RegistrationError> {
        (**self).register_activation(role, name)
    }
}
