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

use std::{borrow::Cow, collections::HashMap, fmt::Display};

use mail_builder::MessageBuilder;

use super::address;

/// A message ready for submission: envelope plus raw RFC 5322 bytes.
#[derive(Debug, Default, Clone)]
pub struct Message<'x> {
    pub mail_from: Address<'x>,
    pub rcpt_to: Vec<Address<'x>>,
    pub body: Cow<'x, [u8]>,
    pub message_id: Option<Cow<'x, str>>,
}

#[derive(Debug, Default, Clone)]
pub struct Address<'x> {
    pub email: Cow<'x, str>,
    pub parameters: Parameters<'x>,
}

#[derive(Debug, Default, Clone)]
pub struct Parameters<'x> {
    params: HashMap<Cow<'x, str>, Option<Cow<'x, str>>>,
}

/// A simple e-mail: one sender, one or more recipients, a subject and
/// plain text and/or HTML content.
#[derive(Debug, Default, Clone)]
pub struct Email<'x> {
    pub from: Cow<'x, str>,
    pub to: Vec<Cow<'x, str>>,
    pub subject: Cow<'x, str>,
    pub text_body: Option<Cow<'x, str>>,
    pub html_body: Option<Cow<'x, str>>,
    pub message_id: Option<Cow<'x, str>>,
}

impl<'x> Message<'x> {
    /// Create a new message
    pub fn new<T, U, V>(from: T, to: U, body: V) -> Self
    where
        T: Into<Address<'x>>,
        U: IntoIterator<Item = T>,
        V: Into<Cow<'x, [u8]>>,
    {
        Message {
            mail_from: from.into(),
            rcpt_to: to.into_iter().map(Into::into).collect(),
            body: body.into(),
            message_id: None,
        }
    }

    /// Create a new empty message.
    pub fn empty() -> Self {
        Message::default()
    }

    /// Set the sender of the message.
    pub fn from(mut self, address: impl Into<Address<'x>>) -> Self {
        self.mail_from = address.into();
        self
    }

    /// Add a message recipient.
    pub fn to(mut self, address: impl Into<Address<'x>>) -> Self {
        self.rcpt_to.push(address.into());
        self
    }

    /// Set the message body.
    pub fn body(mut self, body: impl Into<Cow<'x, [u8]>>) -> Self {
        self.body = body.into();
        self
    }

    /// Checks the envelope without touching the network.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mail_from.email.is_empty() {
            return Err(crate::Error::MissingMailFrom);
        }
        if self.rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }
        address::validate(&self.mail_from.email)?;
        for rcpt in &self.rcpt_to {
            address::validate(&rcpt.email)?;
        }
        Ok(())
    }

    /// Makes sure the message carries a non-blank `Message-ID`, adding
    /// one in front of the headers if the body has none. Returns the id.
    pub(crate) fn ensure_message_id(&mut self) -> String {
        if let Some(message_id) = self
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return message_id.to_string();
        }
        let message_id = match find_message_id(&self.body) {
            Some(message_id) => message_id,
            None => {
                let message_id = generate_message_id(&self.mail_from.email);
                let mut body = format!("Message-ID: <{message_id}>\r\n").into_bytes();
                body.extend_from_slice(&self.body);
                self.body = body.into();
                message_id
            }
        };
        self.message_id = Some(message_id.clone().into());
        message_id
    }
}

impl<'x> From<&'x str> for Address<'x> {
    fn from(email: &'x str) -> Self {
        Address {
            email: email.into(),
            parameters: Parameters::default(),
        }
    }
}

impl<'x> From<String> for Address<'x> {
    fn from(email: String) -> Self {
        Address {
            email: email.into(),
            parameters: Parameters::default(),
        }
    }
}

impl<'x> Address<'x> {
    pub fn new(email: impl Into<Cow<'x, str>>, parameters: Parameters<'x>) -> Self {
        Address {
            email: email.into(),
            parameters,
        }
    }
}

impl<'x> Parameters<'x> {
    pub fn new() -> Self {
        Self {
            params: HashMap::new(),
        }
    }

    pub fn add(&mut self, key: impl Into<Cow<'x, str>>, value: impl Into<Cow<'x, str>>) {
        self.params.insert(key.into(), Some(value.into()));
    }

    pub fn add_keyword(&mut self, key: impl Into<Cow<'x, str>>) {
        self.params.insert(key.into(), None);
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<'x> Display for Parameters<'x> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.params {
            f.write_str(" ")?;
            f.write_str(key)?;
            if let Some(value) = value {
                f.write_str("=")?;
                f.write_str(value)?;
            }
        }
        Ok(())
    }
}

impl<'x> Email<'x> {
    /// Create a new e-mail from the given sender.
    pub fn new(from: impl Into<Cow<'x, str>>) -> Self {
        Email {
            from: from.into(),
            ..Default::default()
        }
    }

    /// Add a recipient.
    pub fn to(mut self, address: impl Into<Cow<'x, str>>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<Cow<'x, str>>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the plain text body.
    pub fn text_body(mut self, body: impl Into<Cow<'x, str>>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Set the HTML body.
    pub fn html_body(mut self, body: impl Into<Cow<'x, str>>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Use a fixed `Message-ID` (without angle brackets) instead of a generated one.
    pub fn message_id(mut self, message_id: impl Into<Cow<'x, str>>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Renders the message, returning its `Message-ID` and RFC 5322 bytes.
    pub fn write_to_vec(&self) -> crate::Result<(String, Vec<u8>)> {
        let message_id = self
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| generate_message_id(&self.from));

        let mut builder = MessageBuilder::new()
            .from(self.from.as_ref())
            .to(self.to.iter().map(|addr| addr.as_ref()).collect::<Vec<_>>())
            .subject(self.subject.as_ref())
            .message_id(message_id.as_str());

        match (&self.text_body, &self.html_body) {
            (Some(text), Some(html)) => {
                builder = builder.text_body(text.as_ref()).html_body(html.as_ref());
            }
            (None, Some(html)) => {
                builder = builder.html_body(html.as_ref());
            }
            (Some(text), None) => {
                builder = builder.text_body(text.as_ref());
            }
            (None, None) => {
                builder = builder.text_body("");
            }
        }

        let body = builder.write_to_vec().map_err(crate::Error::Message)?;
        Ok((message_id, body))
    }
}

pub trait IntoMessage<'x> {
    fn into_message(self) -> crate::Result<Message<'x>>;
}

impl<'x> IntoMessage<'x> for Message<'x> {
    fn into_message(mut self) -> crate::Result<Message<'x>> {
        self.validate()?;
        self.ensure_message_id();
        Ok(self)
    }
}

impl<'x, 'y> IntoMessage<'x> for Email<'y> {
    fn into_message(self) -> crate::Result<Message<'x>> {
        let envelope = Message {
            mail_from: self.from.to_string().into(),
            rcpt_to: self
                .to
                .iter()
                .map(|rcpt| Address::from(rcpt.to_string()))
                .collect(),
            ..Default::default()
        };
        envelope.validate()?;

        let (message_id, body) = self.write_to_vec()?;
        Ok(Message {
            body: body.into(),
            message_id: Some(message_id.into()),
            ..envelope
        })
    }
}

impl<'x, 'y> IntoMessage<'x> for &Email<'y> {
    fn into_message(self) -> crate::Result<Message<'x>> {
        self.clone().into_message()
    }
}

/// Generates a random UUID-shaped identifier at the domain of `from`.
pub fn generate_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");
    let id: u128 = rand::random();
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}@{}",
        (id >> 96) as u32,
        (id >> 80) as u16,
        (id >> 64) as u16,
        (id >> 48) as u16,
        id & 0xffff_ffff_ffff,
        domain
    )
}

/// Looks for a `Message-ID` header in the header block of `body`.
fn find_message_id(body: &[u8]) -> Option<String> {
    let headers = String::from_utf8_lossy(body);
    for line in headers.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("message-id") {
                let value = value.trim().trim_start_matches('<').trim_end_matches('>');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::{find_message_id, generate_message_id, Email, IntoMessage, Message};
    use crate::Error;

    #[test]
    fn message_id_format() {
        let id = generate_message_id("a@x.com");
        let (uuid, domain) = id.split_once('@').unwrap();
        assert_eq!(domain, "x.com");
        assert_eq!(
            uuid.split('-').map(str::len).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert_ne!(id, generate_message_id("a@x.com"));
        assert!(generate_message_id("nobody").ends_with("@localhost"));
    }

    #[test]
    fn render_mime_structure() {
        let (_, text_only) = Email::new("a@x.com")
            .to("b@y.com")
            .subject("Text")
            .text_body("Hello world?")
            .write_to_vec()
            .unwrap();
        let text_only = String::from_utf8(text_only).unwrap();
        assert!(text_only.contains("text/plain"));
        assert!(!text_only.contains("multipart"));

        let (_, html_only) = Email::new("a@x.com")
            .to("b@y.com")
            .subject("HTML")
            .html_body("<b>Hello world?</b>")
            .write_to_vec()
            .unwrap();
        let html_only = String::from_utf8(html_only).unwrap();
        assert!(html_only.contains("text/html"));
        assert!(!html_only.contains("multipart"));

        let (message_id, both) = Email::new("a@x.com")
            .to("b@y.com")
            .subject("2023-04-16")
            .text_body("Hello world?")
            .html_body("<b>Hello world?</b>")
            .write_to_vec()
            .unwrap();
        let both = String::from_utf8(both).unwrap();
        assert!(both.contains("multipart/alternative"));
        assert!(both.contains("text/plain"));
        assert!(both.contains("text/html"));
        assert!(both.contains("Subject: 2023-04-16"));
        assert!(both.contains(&format!("<{message_id}>")));
        assert!(message_id.ends_with("@x.com"));
    }

    #[test]
    fn email_validation() {
        assert!(matches!(
            Email::new("a@x.com").subject("No rcpt").into_message(),
            Err(Error::MissingRcptTo)
        ));
        assert!(matches!(
            Email::new("").to("b@y.com").into_message(),
            Err(Error::MissingMailFrom)
        ));
        assert!(matches!(
            Email::new("a@x.com").to("not an address").into_message(),
            Err(Error::InvalidAddress(addr)) if addr == "not an address"
        ));

        let message = Email::new("a@x.com")
            .to("b@y.com")
            .to("c@z.com")
            .message_id("fixed@x.com")
            .into_message()
            .unwrap();
        assert_eq!(message.mail_from.email, "a@x.com");
        assert_eq!(message.rcpt_to.len(), 2);
        assert_eq!(message.message_id.as_deref(), Some("fixed@x.com"));
    }

    #[test]
    fn blank_message_id_is_replaced() {
        for blank in ["", "   "] {
            let message = Email::new("a@x.com")
                .to("b@y.com")
                .message_id(blank)
                .into_message()
                .unwrap();
            let message_id = message.message_id.as_deref().unwrap();
            assert!(message_id.ends_with("@x.com"), "{message_id:?}");
            assert_eq!(find_message_id(&message.body).as_deref(), Some(message_id));

            let mut raw = Message::new(
                "a@x.com",
                ["b@y.com"],
                b"Subject: hi\r\n\r\nbody\r\n".as_slice(),
            );
            raw.message_id = Some(blank.into());
            let raw = raw.into_message().unwrap();
            let message_id = raw.message_id.as_deref().unwrap();
            assert!(message_id.ends_with("@x.com"), "{message_id:?}");
            assert_eq!(find_message_id(&raw.body).as_deref(), Some(message_id));
        }
    }

    #[test]
    fn raw_message_id() {
        let message = Message::new(
            "a@x.com",
            ["b@y.com"],
            b"Message-ID: <abc@x.com>\r\nSubject: hi\r\n\r\nbody\r\n".as_slice(),
        )
        .into_message()
        .unwrap();
        assert_eq!(message.message_id.as_deref(), Some("abc@x.com"));

        let message = Message::new(
            "a@x.com",
            ["b@y.com"],
            b"Subject: hi\r\n\r\nMessage-ID: <not-a-header@x.com>\r\n".as_slice(),
        )
        .into_message()
        .unwrap();
        let message_id = message.message_id.as_deref().unwrap().to_string();
        assert_ne!(message_id, "not-a-header@x.com");
        assert_eq!(
            find_message_id(&message.body).as_deref(),
            Some(message_id.as_str())
        );
    }
}
