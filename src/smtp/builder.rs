/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use smtp_proto::EhloResponse;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

use crate::{SentMessage, SmtpClient, SmtpClientBuilder};

use super::{
    auth::Credentials,
    message::{IntoMessage, Message},
    tls::build_tls_connector,
};

impl<T: AsRef<str>> SmtpClientBuilder<T> {
    pub fn new(hostname: T, port: u16) -> Self {
        SmtpClientBuilder {
            addr: format!("{}:{}", hostname.as_ref(), port),
            timeout: Duration::from_secs(60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            tls_implicit: true,
            credentials: None,
            port,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
            log_events: false,
            log_transcript: false,
        }
    }

    /// Allow invalid TLS certificates.
    ///
    /// This disables server identity verification entirely and should only
    /// be used against test servers.
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Start the connection in TLS (the default) or in clear text
    pub fn implicit_tls(mut self, tls_implicit: bool) -> Self {
        self.tls_implicit = tls_implicit;
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Authenticate with these credentials after EHLO
    pub fn credentials(mut self, credentials: impl Into<Credentials<String>>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Sets the SMTP connection timeout, which also bounds a whole send
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log connection, authentication and delivery events
    pub fn log_events(mut self, log_events: bool) -> Self {
        self.log_events = log_events;
        self
    }

    /// Log every command and reply exchanged with the server
    pub fn log_transcript(mut self, log_transcript: bool) -> Self {
        self.log_transcript = log_transcript;
        self
    }

    fn validate(&self) -> crate::Result<()> {
        if self.tls_hostname.as_ref().trim().is_empty() {
            Err(crate::Error::InvalidConfig("empty hostname"))
        } else if self.port == 0 {
            Err(crate::Error::InvalidConfig("invalid port"))
        } else {
            Ok(())
        }
    }

    async fn tcp_connect(&self) -> crate::Result<SmtpClient<TcpStream>> {
        self.validate()?;
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map_err(crate::Error::Connection)?;
        if self.log_events {
            log::info!(
                "Connected to {} ({})",
                self.addr,
                if self.tls_implicit { "implicit TLS" } else { "clear text" }
            );
        }
        Ok(SmtpClient::new(stream, self.timeout).with_logging(self.log_events, self.log_transcript))
    }

    /// Greeting, EHLO and authentication. Sends QUIT if the server
    /// turns the session down.
    async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        mut client: SmtpClient<S>,
    ) -> crate::Result<(SmtpClient<S>, EhloResponse<String>)> {
        let result = async {
            client.read_greeting().await?;
            let capabilities = client.ehlo(&self.local_host).await?;
            if let Some(credentials) = &self.credentials {
                client.authenticate(credentials, &capabilities).await?;
            }
            Ok::<_, crate::Error>(capabilities)
        }
        .await;

        match result {
            Ok(capabilities) => Ok((client, capabilities)),
            Err(err) => {
                if err.is_graceful() {
                    let _ = client.quit().await;
                }
                Err(err)
            }
        }
    }

    async fn open_tls(
        &self,
    ) -> crate::Result<(SmtpClient<TlsStream<TcpStream>>, EhloResponse<String>)> {
        let client = self
            .tcp_connect()
            .await?
            .into_tls(&self.tls_connector, self.tls_hostname.as_ref())
            .await?;
        self.handshake(client).await
    }

    async fn open_plain(&self) -> crate::Result<(SmtpClient<TcpStream>, EhloResponse<String>)> {
        let client = self.tcp_connect().await?;
        self.handshake(client).await
    }

    /// Connect over implicit TLS, say EHLO and authenticate
    pub async fn connect(&self) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        tokio::time::timeout(self.timeout, self.open_tls())
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map(|(client, _)| client)
    }

    /// Connect over clear text (should not be used outside tests)
    pub async fn connect_plain(&self) -> crate::Result<SmtpClient<TcpStream>> {
        tokio::time::timeout(self.timeout, self.open_plain())
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map(|(client, _)| client)
    }

    /// Checks that the server can be reached and accepts the configured
    /// credentials, then disconnects. Returns the advertised capabilities.
    pub async fn verify(&self) -> crate::Result<EhloResponse<String>> {
        tokio::time::timeout(self.timeout, async {
            // The connection is closed whatever the QUIT reply
            let capabilities = if self.tls_implicit {
                let (client, capabilities) = self.open_tls().await?;
                let _ = client.quit().await;
                capabilities
            } else {
                let (client, capabilities) = self.open_plain().await?;
                let _ = client.quit().await;
                capabilities
            };
            Ok(capabilities)
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Submits one message over a fresh connection.
    ///
    /// The message is validated before connecting, and the connection is
    /// closed once the transaction ends, whether it succeeded or not.
    pub async fn send<'x>(&self, message: impl IntoMessage<'x>) -> crate::Result<SentMessage> {
        let message = message.into_message()?;
        self.validate()?;

        tokio::time::timeout(self.timeout, async {
            if self.tls_implicit {
                let (client, _) = self.open_tls().await?;
                deliver(client, message).await
            } else {
                let (client, _) = self.open_plain().await?;
                deliver(client, message).await
            }
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }
}

async fn deliver<S: AsyncRead + AsyncWrite + Unpin>(
    mut client: SmtpClient<S>,
    message: Message<'_>,
) -> crate::Result<SentMessage> {
    let result = client.send(message).await;
    match &result {
        Ok(_) => {
            let _ = client.quit().await;
        }
        Err(err) if err.is_graceful() => {
            let _ = client.quit().await;
        }
        Err(_) => (),
    }
    result
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{smtp::message::Email, Error, SmtpClientBuilder};

    #[test]
    fn builder_defaults() {
        let builder = SmtpClientBuilder::new("mail.example.com", 465);
        assert_eq!(builder.addr, "mail.example.com:465");
        assert!(builder.tls_implicit);
        assert!(builder.credentials.is_none());
        assert!(!builder.log_events && !builder.log_transcript);
        assert_eq!(builder.timeout, Duration::from_secs(60));
        assert!(!builder.local_host.is_empty());

        let builder = builder
            .implicit_tls(false)
            .credentials(("root", "root"))
            .helo_host("client.example.com")
            .timeout(Duration::from_secs(5));
        assert!(!builder.tls_implicit);
        assert!(builder.credentials.is_some());
        assert_eq!(builder.local_host, "client.example.com");
    }

    #[tokio::test]
    async fn invalid_config() {
        let email = Email::new("a@x.com").to("b@y.com").text_body("Hello world?");

        assert!(matches!(
            SmtpClientBuilder::new("", 465).send(&email).await,
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            SmtpClientBuilder::new("mail.example.com", 0)
                .send(&email)
                .await,
            Err(Error::InvalidConfig(_))
        ));
    }
}
