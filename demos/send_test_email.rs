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

use smtp_submit::{smtp::message::Email, SmtpClientBuilder};

// Usage: send_test_email <host> <from> <to> [username password]
// Run with RUST_LOG=debug to see the SMTP transcript.
#[tokio::main]
async fn main() {
    env_logger::init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.len() != 3 && args.len() != 5 {
        eprintln!("Usage: send_test_email <host> <from> <to> [username password]");
        std::process::exit(2);
    }

    // Submissions port, TLS from the first byte
    let mut config = SmtpClientBuilder::new(args[0].as_str(), 465)
        .implicit_tls(true)
        .log_events(true)
        .log_transcript(true);
    if let [_, _, _, username, password] = args.as_slice() {
        config = config.credentials((username.as_str(), password.as_str()));
    }
    println!("transport created");

    let email = Email::new(args[1].as_str())
        .to(args[2].as_str())
        .subject("2023-04-16")
        .text_body("Hello world?")
        .html_body("<b>Hello world?</b>");

    match smtp_submit::send(&config, email).await {
        Ok(sent) => println!("Message sent: <{}>", sent.message_id),
        Err(err) => {
            eprintln!("{} error: {}", err.kind(), err);
            std::process::exit(1);
        }
    }
}
