//! Authentication policy: four callbacks that turn SSH auth attempts into
//! accept/reject decisions plus exactly one audit event per attempt. The
//! policy never validates credentials cryptographically (that is `russh`'s
//! job for public-key auth, and meaningless for the rest) — acceptance is
//! purely config-driven.

use crate::config::ConfigView;
use crate::event::EventPayload;

/// Outcome of an auth callback: whether the underlying SSH library should
/// accept the attempt, and the event to record for it.
pub struct AuthOutcome {
    pub accept: bool,
    pub event: EventPayload,
}

/// `none` method. The policy does not itself decide whether `none` is
/// offered at all — that is governed by the outer server's `auth.no_auth`
/// setting, which controls whether the SSH library even advertises the
/// method. Whenever the library *does* report a `none` attempt, exactly
/// one `no_auth` event is emitted.
pub fn none(config: &ConfigView, user: &str) -> AuthOutcome {
    let accept = config.no_auth;
    AuthOutcome {
        accept,
        event: EventPayload::NoAuth {
            user: user.to_string(),
            accepted: accept,
        },
    }
}

/// `password` method. Only reachable when `config.password_auth` is
/// `Some` — otherwise the SSH library does not offer the method at all and
/// this is never called.
pub fn password(config: &ConfigView, user: &str, password: &str) -> AuthOutcome {
    let accept = config
        .password_auth
        .as_ref()
        .is_some_and(|policy| policy.accepted);
    AuthOutcome {
        accept,
        event: EventPayload::PasswordAuth {
            user: user.to_string(),
            password: password.to_string(),
            accepted: accept,
        },
    }
}

/// `public-key` method. By the time this runs, `russh` has already
/// validated the offered key's signature; the policy only decides whether
/// a *validated* key is accepted.
pub fn public_key(config: &ConfigView, user: &str, fingerprint: &str) -> AuthOutcome {
    let accept = config
        .public_key_auth
        .as_ref()
        .is_some_and(|policy| policy.accepted);
    AuthOutcome {
        accept,
        event: EventPayload::PublicKeyAuth {
            user: user.to_string(),
            fingerprint: fingerprint.to_string(),
            accepted: accept,
        },
    }
}

/// `keyboard-interactive` method, after the client has answered every
/// configured question.
pub fn keyboard_interactive(config: &ConfigView, user: &str, answers: Vec<String>) -> AuthOutcome {
    let accept = config
        .keyboard_interactive_auth
        .as_ref()
        .is_some_and(|policy| policy.accepted);
    AuthOutcome {
        accept,
        event: EventPayload::KeyboardInteractiveAuth {
            user: user.to_string(),
            answers,
            accepted: accept,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeyboardInteractiveAuthPolicy, PasswordAuthPolicy, PublicKeyAuthPolicy};

    fn base_config() -> ConfigView {
        ConfigView {
            no_auth: false,
            password_auth: None,
            public_key_auth: None,
            keyboard_interactive_auth: None,
            max_tries: 0,
        }
    }

    #[test]
    fn none_rejected_by_default() {
        let outcome = none(&base_config(), "root");
        assert!(!outcome.accept);
        assert!(matches!(
            outcome.event,
            EventPayload::NoAuth { accepted: false, .. }
        ));
    }

    #[test]
    fn password_accepted_when_configured() {
        let mut config = base_config();
        config.password_auth = Some(PasswordAuthPolicy { accepted: true });
        let outcome = password(&config, "root", "hunter2");
        assert!(outcome.accept);
        match outcome.event {
            EventPayload::PasswordAuth {
                user,
                password,
                accepted,
            } => {
                assert_eq!(user, "root");
                assert_eq!(password, "hunter2");
                assert!(accepted);
            }
            _ => panic!("wrong event variant"),
        }
    }

    #[test]
    fn public_key_rejected_when_disabled_in_config() {
        let mut config = base_config();
        config.public_key_auth = Some(PublicKeyAuthPolicy { accepted: false });
        let outcome = public_key(&config, "root", "SHA256:abc");
        assert!(!outcome.accept);
    }

    #[test]
    fn keyboard_interactive_logs_all_answers() {
        let mut config = base_config();
        config.keyboard_interactive_auth = Some(KeyboardInteractiveAuthPolicy {
            accepted: true,
            instruction: "".into(),
            questions: vec![],
        });
        let outcome = keyboard_interactive(
            &config,
            "root",
            vec!["a".to_string(), "b".to_string()],
        );
        assert!(outcome.accept);
        match outcome.event {
            EventPayload::KeyboardInteractiveAuth { answers, .. } => {
                assert_eq!(answers, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("wrong event variant"),
        }
    }
}
