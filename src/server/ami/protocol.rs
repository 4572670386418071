//! Wire framing for the Asterisk Manager Interface.
//!
//! AMI messages are blocks of `Key: Value` lines terminated by an empty line.
//! A block carrying a `Response` key answers an action we sent (correlated by
//! `ActionID`); everything else is an unsolicited event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An action sent to the switch. The `ActionID` is stamped on by the client
/// when the frame is serialized, never by the caller.
#[derive(Debug, Clone)]
pub struct AmiAction {
    pub name: String,
    pub params: Vec<(String, String)>,
}

impl AmiAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Serialize into wire format with the given correlation id.
    pub fn serialize(&self, action_id: u64) -> String {
        let mut frame = String::new();
        frame.push_str(&format!("Action: {}\r\n", self.name));
        frame.push_str(&format!("ActionID: {}\r\n", action_id));
        for (key, value) in &self.params {
            frame.push_str(&format!("{}: {}\r\n", key, value));
        }
        frame.push_str("\r\n");
        frame
    }
}

/// Answer to one action.
#[derive(Debug, Clone)]
pub struct AmiResponse {
    pub success: bool,
    pub message: Option<String>,
    pub fields: HashMap<String, String>,
}

/// An unsolicited event from the switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmiEvent {
    pub name: String,
    pub fields: HashMap<String, String>,
}

impl AmiEvent {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }

    /// Enumeration actions answer with an event list closed by a
    /// `...ListComplete` event.
    pub fn is_list_complete(&self) -> bool {
        self.name.ends_with("ListComplete")
    }
}

/// One raw block read off the wire, before classification.
#[derive(Debug, Clone, Default)]
pub struct AmiMessage {
    pub fields: HashMap<String, String>,
}

impl AmiMessage {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }

    pub fn action_id(&self) -> Option<u64> {
        self.get("ActionID").and_then(|v| v.parse().ok())
    }

    pub fn is_response(&self) -> bool {
        self.fields.contains_key("Response")
    }

    pub fn into_response(mut self) -> AmiResponse {
        let success = self
            .fields
            .get("Response")
            .map(|v| v.eq_ignore_ascii_case("Success") || v.eq_ignore_ascii_case("Goodbye"))
            .unwrap_or(false);
        let message = self.fields.remove("Message");
        AmiResponse {
            success,
            message,
            fields: self.fields,
        }
    }

    /// Event name, if this block is an event.
    pub fn event_name(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn into_event(mut self) -> Option<AmiEvent> {
        let name = self.fields.remove("Event")?;
        Some(AmiEvent {
            name,
            fields: self.fields,
        })
    }
}

/// Incremental block assembler. Feed lines as they arrive off the socket;
/// a blank line closes the current block.
#[derive(Debug, Default)]
pub struct MessageParser {
    current: HashMap<String, String>,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (terminators already stripped). Returns the completed
    /// message when the blank separator arrives.
    pub fn push_line(&mut self, line: &str) -> Option<AmiMessage> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if self.current.is_empty() {
                return None;
            }
            let fields = std::mem::take(&mut self.current);
            return Some(AmiMessage { fields });
        }

        match line.split_once(':') {
            Some((key, value)) => {
                self.current
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                // Free-form continuation (e.g. CLI command output). Fold it
                // into an Output field so nothing is silently lost.
                let output = self.current.entry("Output".to_string()).or_default();
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(line);
            }
        }
        None
    }
}
