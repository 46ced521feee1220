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

use std::fmt::Display;

use smtp_proto::Response;

pub mod address;
pub mod auth;
pub mod builder;
pub mod client;
pub mod ehlo;
pub mod envelope;
pub mod message;
pub mod tls;

/// Step of an SMTP session, reported alongside unexpected replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Greeting,
    Ehlo,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Rset,
    Noop,
    Quit,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Greeting => "greeting",
            Stage::Ehlo => "EHLO",
            Stage::Auth => "AUTH",
            Stage::MailFrom => "MAIL FROM",
            Stage::RcptTo => "RCPT TO",
            Stage::Data => "DATA",
            Stage::Rset => "RSET",
            Stage::Noop => "NOOP",
            Stage::Quit => "QUIT",
        })
    }
}

pub trait AssertReply: Sized {
    fn assert_positive_completion(self, stage: Stage) -> crate::Result<()>;
    fn assert_code(self, stage: Stage, code: u16) -> crate::Result<()>;
}

impl AssertReply for Response<String> {
    /// Returns Ok if the reply is a positive completion.
    #[inline(always)]
    fn assert_positive_completion(self, stage: Stage) -> crate::Result<()> {
        if (200..=299).contains(&self.code()) {
            Ok(())
        } else {
            Err(crate::Error::UnexpectedReply { stage, reply: self })
        }
    }

    /// Returns Ok if the reply returned a specific status code.
    #[inline(always)]
    fn assert_code(self, stage: Stage, code: u16) -> crate::Result<()> {
        if self.code() == code {
            Ok(())
        } else {
            Err(crate::Error::UnexpectedReply { stage, reply: self })
        }
    }
}
