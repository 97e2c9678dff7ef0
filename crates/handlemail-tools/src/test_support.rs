//! Shared fixtures for this crate's tool tests.

#![cfg(test)]

use std::collections::BTreeMap;

use handlemail_core::models::EmailRequest;

pub fn sample_request() -> EmailRequest {
    EmailRequest {
        message_id: "msg-1@handlemail.ai".into(),
        from_email: "alice@example.com".into(),
        to_email: "ask@handlemail.ai".into(),
        subject: "hi".into(),
        text_body: "body".into(),
        html_body: None,
        date: None,
        in_reply_to: None,
        references: Vec::new(),
        cc: Vec::new(),
        bcc: None,
        headers: BTreeMap::new(),
        attachments: Vec::new(),
        scheduled_task_id: None,
        parent_message_id: None,
        distilled_instructions: None,
        distilled_alias: None,
    }
}
