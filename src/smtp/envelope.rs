/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{SentMessage, SmtpClient};

use super::{
    message::{IntoMessage, Parameters},
    AssertReply, Stage,
};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a MAIL FROM command to the server.
    pub async fn mail_from(&mut self, addr: &str, params: &Parameters<'_>) -> crate::Result<()> {
        self.cmd(format!("MAIL FROM:<{addr}>{params}\r\n").as_bytes())
            .await?
            .assert_code(Stage::MailFrom, 250)
    }

    /// Sends a RCPT TO command to the server. Both `250` and `251`
    /// (user not local, will forward) accept the recipient.
    pub async fn rcpt_to(&mut self, addr: &str, params: &Parameters<'_>) -> crate::Result<()> {
        let reply = self
            .cmd(format!("RCPT TO:<{addr}>{params}\r\n").as_bytes())
            .await?;
        match reply.code() {
            250 | 251 => Ok(()),
            _ => Err(crate::Error::UnexpectedReply {
                stage: Stage::RcptTo,
                reply,
            }),
        }
    }

    /// Sends a DATA command to the server, followed by the message.
    pub async fn data(&mut self, message: impl AsRef<[u8]>) -> crate::Result<Response<String>> {
        self.cmd(b"DATA\r\n").await?.assert_code(Stage::Data, 354)?;
        let reply = tokio::time::timeout(self.timeout, async {
            self.write_message(message.as_ref()).await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)??;

        if reply.code() == 250 {
            Ok(reply)
        } else {
            Err(crate::Error::UnexpectedReply {
                stage: Stage::Data,
                reply,
            })
        }
    }

    /// Sends a RSET command to the server.
    pub async fn rset(&mut self) -> crate::Result<()> {
        self.cmd(b"RSET\r\n")
            .await?
            .assert_positive_completion(Stage::Rset)
    }

    /// Sends a QUIT command and closes the connection, whatever the reply.
    pub async fn quit(mut self) -> crate::Result<()> {
        let result = match self.cmd(b"QUIT\r\n").await {
            Ok(reply) => reply.assert_positive_completion(Stage::Quit),
            Err(err) => Err(err),
        };
        let _ = self.stream.shutdown().await;
        result
    }

    /// Runs one mail transaction: envelope, then message data.
    ///
    /// Refused recipients are reported in the result as long as at least
    /// one recipient was accepted.
    pub async fn send<'x>(&mut self, message: impl IntoMessage<'x>) -> crate::Result<SentMessage> {
        let mut message = message.into_message()?;
        let message_id = message.ensure_message_id();

        self.mail_from(message.mail_from.email.as_ref(), &message.mail_from.parameters)
            .await?;

        let mut accepted = Vec::with_capacity(message.rcpt_to.len());
        let mut rejected = Vec::new();
        for rcpt in &message.rcpt_to {
            match self.rcpt_to(rcpt.email.as_ref(), &rcpt.parameters).await {
                Ok(()) => accepted.push(rcpt.email.to_string()),
                Err(crate::Error::UnexpectedReply { reply, .. }) => {
                    if self.log_events {
                        log::warn!(
                            "Recipient {} rejected: {} {}",
                            rcpt.email,
                            reply.code(),
                            reply.message()
                        );
                    }
                    rejected.push((rcpt.email.to_string(), reply));
                }
                Err(err) => return Err(err),
            }
        }

        if accepted.is_empty() {
            return Err(match rejected.pop() {
                Some((_, reply)) => crate::Error::UnexpectedReply {
                    stage: Stage::RcptTo,
                    reply,
                },
                None => crate::Error::MissingRcptTo,
            });
        }

        let reply = self.data(message.body.as_ref()).await?;
        if self.log_events {
            log::info!(
                "Message <{}> accepted for {} recipient(s): {} {}",
                message_id,
                accepted.len(),
                reply.code(),
                reply.message()
            );
        }

        Ok(SentMessage {
            message_id,
            accepted,
            rejected,
            reply,
        })
    }
}
