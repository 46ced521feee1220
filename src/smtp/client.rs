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

use smtp_proto::{response::parser::ResponseReceiver, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

use super::{AssertReply, Stage};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Wraps an already connected stream. No bytes are exchanged.
    pub fn new(stream: T, timeout: Duration) -> Self {
        SmtpClient {
            stream,
            timeout,
            log_events: false,
            log_transcript: false,
        }
    }

    /// Enables lifecycle and/or protocol transcript logging.
    pub fn with_logging(mut self, events: bool, transcript: bool) -> Self {
        self.log_events = events;
        self.log_transcript = transcript;
        self
    }

    pub(crate) async fn read(&mut self) -> crate::Result<Response<String>> {
        let mut buf = vec![0u8; 1024];
        let mut parser = ResponseReceiver::default();

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }

            match parser.parse(&mut buf[..br].iter()) {
                Ok(reply) => {
                    if self.log_transcript {
                        log::debug!("S: {} {}", reply.code(), reply.message());
                    }
                    return Ok(reply);
                }
                Err(err) => match err {
                    smtp_proto::Error::NeedsMoreData { .. } => (),
                    _ => {
                        return Err(crate::Error::UnparseableReply);
                    }
                },
            }
        }
    }

    /// Reads the server greeting, which must be a `220` reply.
    pub async fn read_greeting(&mut self) -> crate::Result<Response<String>> {
        let reply = tokio::time::timeout(self.timeout, self.read())
            .await
            .map_err(|_| crate::Error::Timeout)??;
        if reply.code() == 220 {
            Ok(reply)
        } else {
            Err(crate::Error::UnexpectedReply {
                stage: Stage::Greeting,
                reply,
            })
        }
    }

    /// Sends a command to the SMTP server and waits for a reply.
    pub async fn cmd(&mut self, cmd: impl AsRef<[u8]>) -> crate::Result<Response<String>> {
        self.exchange(cmd.as_ref(), false).await
    }

    /// Same as `cmd`, but keeps the command out of the transcript.
    pub(crate) async fn cmd_secret(
        &mut self,
        cmd: impl AsRef<[u8]>,
    ) -> crate::Result<Response<String>> {
        self.exchange(cmd.as_ref(), true).await
    }

    async fn exchange(&mut self, cmd: &[u8], secret: bool) -> crate::Result<Response<String>> {
        tokio::time::timeout(self.timeout, async {
            if self.log_transcript {
                log_command(cmd, secret);
            }
            self.stream.write_all(cmd).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Writes a message body applying the transparency procedure and
    /// the end-of-data marker.
    pub async fn write_message(&mut self, message: &[u8]) -> tokio::io::Result<()> {
        #[derive(Debug)]
        enum State {
            Cr,
            CrLf,
            Init,
        }

        if self.log_transcript {
            log::debug!("C: <{} bytes of message data>", message.len());
        }

        // The payload starts at the beginning of a line. Bare LF line
        // ends go out as CRLF so every line start is seen.
        let mut state = State::CrLf;
        let mut last_pos = 0;
        for (pos, byte) in message.iter().enumerate() {
            match byte {
                b'.' if matches!(state, State::CrLf) => {
                    if let Some(bytes) = message.get(last_pos..pos) {
                        self.stream.write_all(bytes).await?;
                        self.stream.write_all(b".").await?;
                        last_pos = pos;
                    }
                    state = State::Init;
                }
                b'\r' => {
                    state = State::Cr;
                }
                b'\n' => {
                    if !matches!(state, State::Cr) {
                        if let Some(bytes) = message.get(last_pos..pos) {
                            self.stream.write_all(bytes).await?;
                            self.stream.write_all(b"\r").await?;
                            last_pos = pos;
                        }
                    }
                    state = State::CrLf;
                }
                _ => {
                    state = State::Init;
                }
            }
        }
        if let Some(bytes) = message.get(last_pos..) {
            self.stream.write_all(bytes).await?;
        }
        if matches!(state, State::CrLf) {
            self.stream.write_all(b".\r\n").await?;
        } else {
            self.stream.write_all(b"\r\n.\r\n").await?;
        }
        self.stream.flush().await
    }

    /// Sends a NOOP command to the server.
    pub async fn noop(&mut self) -> crate::Result<()> {
        self.cmd(b"NOOP\r\n")
            .await?
            .assert_positive_completion(Stage::Noop)
    }
}

fn log_command(cmd: &[u8], secret: bool) {
    let line = String::from_utf8_lossy(cmd);
    let line = line.trim_end();
    if !secret {
        log::debug!("C: {line}");
    } else if let Some(mechanism) = line
        .strip_prefix("AUTH ")
        .and_then(|args| args.split(' ').next())
    {
        log::debug!("C: AUTH {mechanism} <redacted>");
    } else {
        log::debug!("C: <redacted>");
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::{AsyncRead, AsyncWrite};

    use crate::{smtp::Stage, Error, SmtpClient};

    #[derive(Default)]
    struct AsyncBufWriter {
        buf: Vec<u8>,
    }

    impl AsyncRead for AsyncBufWriter {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            unreachable!()
        }
    }

    impl AsyncWrite for AsyncBufWriter {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<Result<usize, std::io::Error>> {
            self.buf.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), std::io::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), std::io::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn transparency_procedure() {
        for (test, result) in [
            ("A: b\r\n.\r\n", "A: b\r\n..\r\n.\r\n"),
            ("A: b\r\n.", "A: b\r\n..\r\n.\r\n"),
            ("A: b\r\n..\r\n", "A: b\r\n...\r\n.\r\n"),
            ("A: ...b", "A: ...b\r\n.\r\n"),
            (".leading\r\n", "..leading\r\n.\r\n"),
            ("", ".\r\n"),
            ("a\n.\nb", "a\r\n..\r\nb\r\n.\r\n"),
            ("A: b\n\n.\n", "A: b\r\n\r\n..\r\n.\r\n"),
            ("\n.", "\r\n..\r\n.\r\n"),
            (
                "Subject: s\n\nline1\n.\nMAIL FROM:<evil@z.com>\n",
                "Subject: s\r\n\r\nline1\r\n..\r\nMAIL FROM:<evil@z.com>\r\n.\r\n",
            ),
        ] {
            let mut client = SmtpClient::new(AsyncBufWriter::default(), Duration::from_secs(30));
            client.write_message(test.as_bytes()).await.unwrap();
            assert_eq!(String::from_utf8(client.stream.buf).unwrap(), result);
        }
    }

    #[tokio::test]
    async fn greeting_must_be_220() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut server_io, b"554 No SMTP service here\r\n")
            .await
            .unwrap();

        let mut client = SmtpClient::new(client_io, Duration::from_secs(5));
        match client.read_greeting().await {
            Err(Error::UnexpectedReply { stage, reply }) => {
                assert_eq!(stage, Stage::Greeting);
                assert_eq!(reply.code(), 554);
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.code())),
        }
    }
}
