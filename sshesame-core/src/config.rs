//! Read-only configuration view consumed by the engine. Loading this from
//! disk, applying defaults, and generating host keys are the bin crate's
//! job; the engine only ever sees this frozen value.

#[derive(Debug, Clone)]
pub struct ConfigView {
    pub no_auth: bool,
    pub password_auth: Option<PasswordAuthPolicy>,
    pub public_key_auth: Option<PublicKeyAuthPolicy>,
    pub keyboard_interactive_auth: Option<KeyboardInteractiveAuthPolicy>,
    pub max_tries: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordAuthPolicy {
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PublicKeyAuthPolicy {
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct KeyboardInteractiveAuthPolicy {
    pub accepted: bool,
    pub instruction: String,
    pub questions: Vec<KeyboardInteractiveQuestion>,
}

#[derive(Debug, Clone)]
pub struct KeyboardInteractiveQuestion {
    pub text: String,
    pub echo: bool,
}

impl Default for ConfigView {
    fn default() -> Self {
        Self {
            no_auth: false,
            password_auth: Some(PasswordAuthPolicy { accepted: true }),
            public_key_auth: Some(PublicKeyAuthPolicy { accepted: true }),
            keyboard_interactive_auth: None,
            max_tries: 0,
        }
    }
}
