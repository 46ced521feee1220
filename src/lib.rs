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

//! # smtp-submit
//!
//! _smtp-submit_ is a small SMTP submission client. It opens one connection,
//! submits one message and reports the outcome:
//!
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) submission.
//! - Implicit **TLS** from the first byte (_RFC 8314_, port 465), with full
//!   certificate verification unless explicitly relaxed.
//! - SMTP Service Extension for Authentication (_RFC 4954_) with automatic mechanism
//!   negotiation (from most secure to least secure):
//!   - OAUTHBEARER (_RFC 7628_)
//!   - XOAUTH2 (Google proprietary)
//!   - CRAM-MD5 (_RFC 2195_)
//!   - LOGIN
//!   - PLAIN
//! - **MIME** messages (_RFC 5322_, _RFC 2045_) with `multipart/alternative`
//!   when both text and HTML bodies are present.
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! ```rust
//!     let email = Email::new("a@x.com")
//!         .to("b@y.com")
//!         .subject("2023-04-16")
//!         .text_body("Hello world?")
//!         .html_body("<b>Hello world?</b>");
//!
//!     let config = SmtpClientBuilder::new("mail.example.com", 465)
//!         .credentials(("john", "p4ssw0rd"))
//!         .log_events(true);
//!
//!     let sent = smtp_submit::send(&config, email).await?;
//!     println!("Message sent: <{}>", sent.message_id);
//! ```
//!
//! Errors are terminal: the client never retries. Use [`Error::kind`] to
//! tell connection, protocol, authentication, timeout and validation
//! failures apart.
//!

pub mod smtp;

use std::{fmt::Display, time::Duration};

pub use mail_builder;
pub use smtp_proto;

use smtp::{auth::Credentials, Stage};
use smtp_proto::Response;
use tokio_rustls::TlsConnector;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// The remote host could not be reached
    Connection(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply {
        stage: Stage,
        reply: Response<String>,
    },

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Invalid transport configuration.
    InvalidConfig(&'static str),

    /// Syntactically invalid e-mail address.
    InvalidAddress(String),

    /// The message could not be rendered.
    Message(std::io::Error),

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Authentication,
    Timeout,
    Validation,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client session over a connected stream.
pub struct SmtpClient<T> {
    pub stream: T,
    pub timeout: Duration,
    pub(crate) log_events: bool,
    pub(crate) log_transcript: bool,
}

/// Transport configuration, used to open one session per send.
#[derive(Clone)]
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub tls_implicit: bool,
    pub credentials: Option<Credentials<String>>,
    pub addr: String,
    pub port: u16,
    pub local_host: String,
    pub log_events: bool,
    pub log_transcript: bool,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// `Message-ID` of the submitted message, without angle brackets.
    pub message_id: String,
    /// Recipients accepted by the server.
    pub accepted: Vec<String>,
    /// Recipients refused by the server, with the refusal.
    pub rejected: Vec<(String, Response<String>)>,
    /// Final reply to the message data.
    pub reply: Response<String>,
}

/// Submits a single message using the given transport configuration.
///
/// The message is validated before any connection is opened. The whole
/// exchange is bounded by the configured timeout.
pub async fn send<'x, T: AsRef<str>>(
    config: &SmtpClientBuilder<T>,
    message: impl smtp::message::IntoMessage<'x>,
) -> Result<SentMessage> {
    config.send(message).await
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Connection(_) | Error::Tls(_) | Error::InvalidTLSName => {
                ErrorKind::Connection
            }
            Error::UnparseableReply | Error::UnexpectedReply { .. } => ErrorKind::Protocol,
            Error::Base64(_)
            | Error::Auth(_)
            | Error::AuthenticationFailed(_)
            | Error::UnsupportedAuthMechanism => ErrorKind::Authentication,
            Error::Timeout => ErrorKind::Timeout,
            Error::InvalidConfig(_)
            | Error::InvalidAddress(_)
            | Error::Message(_)
            | Error::MissingMailFrom
            | Error::MissingRcptTo => ErrorKind::Validation,
        }
    }

    /// Returns the server reply that caused this error, if any.
    pub fn reply(&self) -> Option<&Response<String>> {
        match self {
            Error::UnexpectedReply { reply, .. } | Error::AuthenticationFailed(reply) => {
                Some(reply)
            }
            _ => None,
        }
    }

    /// The connection is still in a state where QUIT can be sent.
    pub(crate) fn is_graceful(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedReply { .. }
                | Error::AuthenticationFailed(_)
                | Error::UnsupportedAuthMechanism
                | Error::Auth(_)
                | Error::Base64(_)
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::Connection(err) | Error::Message(err) => Some(err),
            Error::Tls(err) => Some(&**err),
            Error::Base64(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connection(e) => write!(f, "Connection failed: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply { stage, reply } => write!(
                f,
                "Unexpected reply at {stage}: {} {}",
                reply.code(),
                reply.message()
            ),
            Error::AuthenticationFailed(reply) => write!(
                f,
                "Authentication failed: {} {}",
                reply.code(),
                reply.message()
            ),
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::InvalidConfig(e) => write!(f, "Invalid configuration: {e}"),
            Error::InvalidAddress(addr) => write!(f, "Invalid e-mail address {addr:?}"),
            Error::Message(e) => write!(f, "Failed to build message: {e}"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}

#[cfg(test)]
mod test {
    use smtp_proto::response::parser::ResponseReceiver;

    use crate::{smtp::Stage, Error, ErrorKind};

    #[test]
    fn error_kinds() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(Error::Connection(refused).kind(), ErrorKind::Connection);
        assert_eq!(Error::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(Error::MissingRcptTo.kind(), ErrorKind::Validation);
        assert_eq!(
            Error::UnsupportedAuthMechanism.kind(),
            ErrorKind::Authentication
        );

        let err = Error::UnexpectedReply {
            stage: Stage::RcptTo,
            reply: ResponseReceiver::default()
                .parse(&mut b"550 No such user\r\n".iter())
                .unwrap(),
        };
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.reply().map(|r| r.code()), Some(550));
        assert_eq!(
            err.to_string(),
            "Unexpected reply at RCPT TO: 550 No such user"
        );
    }
}
