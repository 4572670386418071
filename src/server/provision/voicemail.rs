//! voicemail.conf renderer.
//!
//! One `ext => pin,name[,email]` line per enabled mailbox in the `[default]`
//! context. The email column only selects where the switch sends
//! notifications; delivery is its business, not ours.

use std::fmt::Write;

use crate::models::VoicemailBox;

use super::ConfigSnapshot;

pub fn render(snapshot: &ConfigSnapshot) -> String {
    let mut boxes: Vec<&VoicemailBox> =
        snapshot.mailboxes.iter().filter(|m| m.enabled).collect();
    boxes.sort_by(|a, b| a.extension.cmp(&b.extension));

    let mut out = String::from(
        "; voicemail.conf - generated, do not edit by hand\n\
         \n\
         [general]\n\
         format=wav49|gsm|wav\n\
         attach=yes\n\
         maxmsg=100\n\
         maxsecs=180\n\
         emailsubject=New voicemail for ${VM_MAILBOX}\n\
         \n\
         [default]\n",
    );

    for mailbox in boxes {
        let name = mailbox
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&mailbox.extension);
        match mailbox.email.as_deref().filter(|e| !e.is_empty()) {
            Some(email) => {
                let _ = writeln!(
                    out,
                    "{} => {},{},{}",
                    mailbox.extension, mailbox.pin, name, email
                );
            }
            None => {
                let _ = writeln!(out, "{} => {},{}", mailbox.extension, mailbox.pin, name);
            }
        }
    }

    out
}
