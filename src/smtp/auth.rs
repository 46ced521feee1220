/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{fmt::Display, hash::Hash};

use base64::{engine::general_purpose, Engine};
use smtp_proto::{
    EhloResponse, AUTH_CRAM_MD5, AUTH_LOGIN, AUTH_OAUTHBEARER, AUTH_PLAIN, AUTH_XOAUTH2,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

use super::Stage;

/// Mechanisms in order of preference, most secure first.
const PREFERENCE: [u64; 5] = [
    AUTH_OAUTHBEARER,
    AUTH_XOAUTH2,
    AUTH_CRAM_MD5,
    AUTH_LOGIN,
    AUTH_PLAIN,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Credentials<T: AsRef<str>> {
    Plain { username: T, secret: T },
    OAuthBearer { token: T },
    XOauth2 { username: T, secret: T },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

impl<T: AsRef<str>> Credentials<T> {
    /// Creates a new `Credentials` instance.
    pub fn new(username: T, secret: T) -> Credentials<T> {
        Credentials::Plain { username, secret }
    }

    /// Creates a new XOAuth2 `Credentials` instance.
    pub fn new_xoauth2(username: T, secret: T) -> Credentials<T> {
        Credentials::XOauth2 { username, secret }
    }

    /// Creates a new OAuthBearer `Credentials` instance.
    pub fn new_oauth(token: T) -> Credentials<T> {
        Credentials::OAuthBearer { token }
    }

    /// Mechanisms these credentials can be used with.
    pub fn mechanisms(&self) -> u64 {
        match self {
            Credentials::Plain { .. } => {
                let mechanisms = AUTH_LOGIN | AUTH_PLAIN;
                #[cfg(feature = "cram-md5")]
                let mechanisms = mechanisms | AUTH_CRAM_MD5;
                mechanisms
            }
            Credentials::OAuthBearer { .. } => AUTH_OAUTHBEARER,
            Credentials::XOauth2 { .. } => AUTH_XOAUTH2,
        }
    }

    pub(crate) fn encode(&self, mechanism: u64, challenge: &str) -> crate::Result<String> {
        let response = match (mechanism, self) {
            (AUTH_PLAIN, Credentials::Plain { username, secret }) => {
                format!("\u{0}{}\u{0}{}", username.as_ref(), secret.as_ref())
            }
            (AUTH_LOGIN, Credentials::Plain { username, secret }) => {
                login_response(username.as_ref(), secret.as_ref(), challenge)?.to_string()
            }
            #[cfg(feature = "cram-md5")]
            (AUTH_CRAM_MD5, Credentials::Plain { username, secret }) => {
                cram_md5_response(username.as_ref(), secret.as_ref(), challenge)?
            }
            (AUTH_XOAUTH2, Credentials::XOauth2 { username, secret }) => format!(
                "user={}\x01auth=Bearer {}\x01\x01",
                username.as_ref(),
                secret.as_ref()
            ),
            (AUTH_OAUTHBEARER, Credentials::OAuthBearer { token }) => {
                format!("n,,\x01auth=Bearer {}\x01\x01", token.as_ref())
            }
            _ => return Err(crate::Error::UnsupportedAuthMechanism),
        };

        Ok(general_purpose::STANDARD.encode(response))
    }
}

fn login_response<'x>(username: &'x str, secret: &'x str, challenge: &str) -> crate::Result<&'x str> {
    let challenge = general_purpose::STANDARD.decode(challenge)?;

    if challenge
        .get(0..9)
        .is_some_and(|c| b"user name".eq_ignore_ascii_case(c))
        || challenge
            .get(0..8)
            .is_some_and(|c| b"username".eq_ignore_ascii_case(c))
    {
        Ok(username)
    } else if challenge
        .get(0..8)
        .is_some_and(|c| b"password".eq_ignore_ascii_case(c))
    {
        Ok(secret)
    } else {
        Err(Error::InvalidChallenge.into())
    }
}

#[cfg(feature = "cram-md5")]
fn cram_md5_response(username: &str, secret: &str, challenge: &str) -> crate::Result<String> {
    let mut secret_opad: Vec<u8> = vec![0x5c; 64];
    let mut secret_ipad: Vec<u8> = vec![0x36; 64];

    // Keys longer than the block size are hashed first
    let key = if secret.len() <= 64 {
        secret.as_bytes().to_vec()
    } else {
        md5::compute(secret.as_bytes()).0.to_vec()
    };
    for (pos, byte) in key.iter().enumerate() {
        secret_opad[pos] = *byte ^ 0x5c;
        secret_ipad[pos] = *byte ^ 0x36;
    }

    secret_ipad.extend_from_slice(&general_purpose::STANDARD.decode(challenge)?);
    secret_opad.extend_from_slice(&md5::compute(&secret_ipad).0);

    Ok(format!("{} {:x}", username, md5::compute(&secret_opad)))
}

/// SASL name of a single mechanism bit.
pub fn mechanism_name(mechanism: u64) -> &'static str {
    match mechanism {
        AUTH_PLAIN => "PLAIN",
        AUTH_LOGIN => "LOGIN",
        AUTH_CRAM_MD5 => "CRAM-MD5",
        AUTH_XOAUTH2 => "XOAUTH2",
        AUTH_OAUTHBEARER => "OAUTHBEARER",
        _ => "UNKNOWN",
    }
}

/// Mechanisms to attempt, in order, given what the server advertised.
pub fn negotiate<T: AsRef<str>>(credentials: &Credentials<T>, advertised: u64) -> Vec<u64> {
    let available = credentials.mechanisms() & advertised;
    PREFERENCE
        .iter()
        .copied()
        .filter(|mechanism| available & mechanism != 0)
        .collect()
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates using the strongest mechanism both sides support.
    pub async fn authenticate<U>(
        &mut self,
        credentials: &Credentials<U>,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<&mut Self>
    where
        U: AsRef<str> + PartialEq + Eq + Hash,
    {
        let mut has_err = None;

        for mechanism in negotiate(credentials, capabilities.auth_mechanisms) {
            match self.auth(mechanism, credentials).await {
                Ok(_) => {
                    if self.log_events {
                        log::info!("Authenticated using {}", mechanism_name(mechanism));
                    }
                    return Ok(self);
                }
                Err(err) => match err {
                    crate::Error::UnexpectedReply { reply, .. } => {
                        let has_failed = reply.code() == 535;
                        has_err = reply.into();
                        if has_failed {
                            break;
                        }
                    }
                    crate::Error::UnsupportedAuthMechanism => (),
                    _ => return Err(err),
                },
            }
        }

        if let Some(has_err) = has_err {
            if self.log_events {
                log::warn!(
                    "Authentication failed: {} {}",
                    has_err.code(),
                    has_err.message()
                );
            }
            Err(crate::Error::AuthenticationFailed(has_err))
        } else {
            Err(crate::Error::UnsupportedAuthMechanism)
        }
    }

    pub(crate) async fn auth<U>(
        &mut self,
        mechanism: u64,
        credentials: &Credentials<U>,
    ) -> crate::Result<()>
    where
        U: AsRef<str> + PartialEq + Eq + Hash,
    {
        let name = mechanism_name(mechanism);
        let mut reply = if (mechanism & (AUTH_PLAIN | AUTH_XOAUTH2 | AUTH_OAUTHBEARER)) != 0 {
            self.cmd_secret(format!("AUTH {} {}\r\n", name, credentials.encode(mechanism, "")?))
                .await?
        } else {
            self.cmd(format!("AUTH {}\r\n", name)).await?
        };

        for _ in 0..3 {
            match reply.code() {
                334 => {
                    let response = credentials.encode(mechanism, reply.message())?;
                    reply = self.cmd_secret(format!("{response}\r\n")).await?;
                }
                235 => {
                    return Ok(());
                }
                _ => {
                    return Err(crate::Error::UnexpectedReply {
                        stage: Stage::Auth,
                        reply,
                    });
                }
            }
        }

        Err(crate::Error::UnexpectedReply {
            stage: Stage::Auth,
            reply,
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge received."),
        }
    }
}

impl From<(&str, &str)> for Credentials<String> {
    fn from(credentials: (&str, &str)) -> Self {
        Credentials::Plain {
            username: credentials.0.to_string(),
            secret: credentials.1.to_string(),
        }
    }
}

impl From<(String, String)> for Credentials<String> {
    fn from(credentials: (String, String)) -> Self {
        Credentials::Plain {
            username: credentials.0,
            secret: credentials.1,
        }
    }
}

impl<'x> From<(&'x str, &'x str)> for Credentials<&'x str> {
    fn from(credentials: (&'x str, &'x str)) -> Self {
        Credentials::Plain {
            username: credentials.0,
            secret: credentials.1,
        }
    }
}

#[cfg(test)]
mod test {
    use smtp_proto::{AUTH_CRAM_MD5, AUTH_LOGIN, AUTH_OAUTHBEARER, AUTH_PLAIN, AUTH_XOAUTH2};

    use crate::smtp::auth::{negotiate, Credentials};

    #[test]
    fn auth_encode() {
        // Challenge-Response Authentication Mechanism (CRAM)
        #[cfg(feature = "cram-md5")]
        assert_eq!(
            Credentials::new("tim", "tanstaaftanstaaf")
                .encode(
                    AUTH_CRAM_MD5,
                    "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+",
                )
                .unwrap(),
            "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw"
        );

        // SASL XOAUTH2
        assert_eq!(
            Credentials::XOauth2 {
                username: "someuser@example.com",
                secret: "ya29.vF9dft4qmTc2Nvb3RlckBhdHRhdmlzdGEuY29tCg"
            }
            .encode(AUTH_XOAUTH2, "",)
            .unwrap(),
            concat!(
                "dXNlcj1zb21ldXNlckBleGFtcGxlLmNvbQFhdXRoPUJlYXJlciB5YTI5Ln",
                "ZGOWRmdDRxbVRjMk52YjNSbGNrQmhkSFJoZG1semRHRXVZMjl0Q2cBAQ=="
            )
        );

        // OAUTHBEARER
        assert_eq!(
            Credentials::new_oauth("token").encode(AUTH_OAUTHBEARER, "").unwrap(),
            "biwsAWF1dGg9QmVhcmVyIHRva2VuAQE="
        );

        // Login
        assert_eq!(
            Credentials::new("tim", "tanstaaftanstaaf")
                .encode(AUTH_LOGIN, "VXNlciBOYW1lAA==",)
                .unwrap(),
            "dGlt"
        );
        assert_eq!(
            Credentials::new("tim", "tanstaaftanstaaf")
                .encode(AUTH_LOGIN, "UGFzc3dvcmQA",)
                .unwrap(),
            "dGFuc3RhYWZ0YW5zdGFhZg=="
        );
        assert!(Credentials::new("tim", "tanstaaftanstaaf")
            .encode(AUTH_LOGIN, "SGVsbG8=")
            .is_err());

        // Plain
        assert_eq!(
            Credentials::new("tim", "tanstaaftanstaaf")
                .encode(AUTH_PLAIN, "",)
                .unwrap(),
            "AHRpbQB0YW5zdGFhZnRhbnN0YWFm"
        );

        // Mechanism that does not fit the credentials
        assert!(Credentials::new_oauth("token").encode(AUTH_PLAIN, "").is_err());
    }

    #[test]
    fn negotiate_mechanisms() {
        let plain = Credentials::new("tim", "tanstaaftanstaaf");
        let advertised = AUTH_PLAIN | AUTH_LOGIN | AUTH_CRAM_MD5 | AUTH_XOAUTH2;

        #[cfg(feature = "cram-md5")]
        assert_eq!(
            negotiate(&plain, advertised),
            vec![AUTH_CRAM_MD5, AUTH_LOGIN, AUTH_PLAIN]
        );
        assert_eq!(negotiate(&plain, AUTH_PLAIN), vec![AUTH_PLAIN]);
        assert!(negotiate(&plain, AUTH_XOAUTH2).is_empty());
        assert_eq!(
            negotiate(&Credentials::new_xoauth2("a", "b"), advertised),
            vec![AUTH_XOAUTH2]
        );
        assert!(negotiate(&Credentials::new_oauth("t"), advertised).is_empty());
    }
}
