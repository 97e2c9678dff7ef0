//! Rejection-email bodies for the validators pipeline.
//!
//! Plain templated strings, not model output — rendered once per rejection
//! with `minijinja`, the same templating crate used for server-side bodies
//! in `mcp-agent-mail-server/src/templates.rs`.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use serde::Serialize;

const TOO_MANY_ATTACHMENTS_TEXT: &str = "\
Your email could not be processed due to too many attachments.

Maximum allowed attachments: {{ max_allowed }}
Number of attachments in your email: {{ received }}

Please reduce the number of attachments and try again.

Best,
handlemail";

const TOO_MANY_ATTACHMENTS_HTML: &str = "\
<p>Your email could not be processed due to too many attachments.</p>
<p>Maximum allowed attachments: {{ max_allowed }}<br>
Number of attachments in your email: {{ received }}</p>
<p>Please reduce the number of attachments and try again.</p>
<p>Best regards,<br>handlemail</p>";

const ATTACHMENT_TOO_LARGE_TEXT: &str = "\
Your email could not be processed due to an oversized attachment.

Maximum allowed size per attachment: {{ max_allowed_mb }}MB
Size of attachment '{{ filename }}': {{ size_mb }}MB

Please reduce the file size and try again.

Best,
handlemail";

const ATTACHMENT_TOO_LARGE_HTML: &str = "\
<p>Your email could not be processed due to an oversized attachment.</p>
<p>Maximum allowed size per attachment: {{ max_allowed_mb }}MB<br>
Size of attachment '{{ filename }}': {{ size_mb }}MB</p>
<p>Please reduce the file size and try again.</p>
<p>Best regards,<br>handlemail</p>";

const UNSUPPORTED_ATTACHMENT_TYPE_TEXT: &str = "\
Your email could not be processed because it contains a blocked attachment type.

Attachment '{{ filename }}' has content type '{{ content_type }}', which is not accepted for security reasons.

Please remove the attachment and try again.

Best,
handlemail";

const UNSUPPORTED_ATTACHMENT_TYPE_HTML: &str = "\
<p>Your email could not be processed because it contains a blocked attachment type.</p>
<p>Attachment '{{ filename }}' has content type <code>{{ content_type }}</code>, which is not accepted for security reasons.</p>
<p>Please remove the attachment and try again.</p>
<p>Best regards,<br>handlemail</p>";

const UNSUPPORTED_HANDLE_TEXT: &str = "\
This email alias is not supported.

Handle used: {{ handle }}
Known handles: {{ known_handles }}

Please visit {{ docs_url }} to learn about supported email handles.

Best,
handlemail";

const UNSUPPORTED_HANDLE_HTML: &str = "\
<p>This email alias is not supported.</p>
<p>Handle used: <code>{{ handle }}</code><br>
Known handles: {{ known_handles }}</p>
<p>Please visit <a href=\"{{ docs_url }}\">{{ docs_url }}</a> to learn about supported email handles.</p>
<p>Best regards,<br>handlemail</p>";

const WHITELIST_VERIFICATION_SENT_TEXT: &str = "\
Your email could not be processed because your domain is not automatically whitelisted.

Major email providers (Gmail, Outlook, Yahoo, etc.) are automatically whitelisted, but custom domains require verification.

GOOD NEWS: We've automatically started the verification process for you!

CHECK YOUR EMAIL: You should receive a verification email at {{ from_email }} within the next few minutes.

NEXT STEPS:
1. Click the verification link in the email we just sent
2. Once verified, simply resend your original email to this address
3. Your email will then be processed normally

IMPORTANT: You must verify your email first, then resend your request for it to be processed.

Best,
handlemail";

const WHITELIST_VERIFICATION_SENT_HTML: &str = "\
<p>Your email could not be processed because your domain is not automatically whitelisted.</p>
<p>Major email providers (Gmail, Outlook, Yahoo, etc.) are automatically whitelisted, but custom domains require verification.</p>
<p><strong>Good news:</strong> we've automatically started the verification process for you.</p>
<p><strong>Check your email:</strong> you should receive a verification email at {{ from_email }} within the next few minutes.</p>
<p><strong>Next steps:</strong></p>
<ol>
<li>Click the verification link in the email we just sent</li>
<li>Once verified, simply resend your original email to this address</li>
<li>Your email will then be processed normally</li>
</ol>
<p><strong>Important:</strong> you must verify your email first, then resend your request for it to be processed.</p>
<p>Best regards,<br>handlemail</p>";

const WHITELIST_VERIFICATION_FAILED_TEXT: &str = "\
Your email could not be processed because your domain is not automatically whitelisted.

Major email providers (Gmail, Outlook, Yahoo, etc.) are automatically whitelisted, but custom domains require manual approval.

We attempted to automatically send you a verification email, but it failed. Please visit {{ signup_url }} to manually request access.

Once your email is verified, you can resend your email for processing.

Best,
handlemail";

const WHITELIST_VERIFICATION_FAILED_HTML: &str = "\
<p>Your email could not be processed because your domain is not automatically whitelisted.</p>
<p>Major email providers (Gmail, Outlook, Yahoo, etc.) are automatically whitelisted, but custom domains require manual approval.</p>
<p>We attempted to automatically send you a verification email, but it failed. Please visit <a href=\"{{ signup_url }}\">{{ signup_url }}</a> to manually request access.</p>
<p>Once your email is verified, you can resend your email for processing.</p>
<p>Best regards,<br>handlemail</p>";

const RATE_LIMIT_EXCEEDED_TEXT: &str = "\
Your email could not be processed because it exceeded our rate limit ({{ limit_type }}).

Please try again later.
{% if upgrade_hint %}
Need a higher limit? Upgrade your plan at {{ upgrade_hint }}.
{% endif %}
Best,
handlemail";

const RATE_LIMIT_EXCEEDED_HTML: &str = "\
<p>Your email could not be processed because it exceeded our rate limit ({{ limit_type }}).</p>
<p>Please try again later.</p>
{% if upgrade_hint %}<p>Need a higher limit? <a href=\"{{ upgrade_hint }}\">Upgrade your plan</a>.</p>{% endif %}
<p>Best regards,<br>handlemail</p>";

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("too_many_attachments.txt", TOO_MANY_ATTACHMENTS_TEXT).expect("valid template");
    env.add_template("too_many_attachments.html", TOO_MANY_ATTACHMENTS_HTML).expect("valid template");
    env.add_template("attachment_too_large.txt", ATTACHMENT_TOO_LARGE_TEXT).expect("valid template");
    env.add_template("attachment_too_large.html", ATTACHMENT_TOO_LARGE_HTML).expect("valid template");
    env.add_template("unsupported_attachment_type.txt", UNSUPPORTED_ATTACHMENT_TYPE_TEXT).expect("valid template");
    env.add_template("unsupported_attachment_type.html", UNSUPPORTED_ATTACHMENT_TYPE_HTML).expect("valid template");
    env.add_template("unsupported_handle.txt", UNSUPPORTED_HANDLE_TEXT).expect("valid template");
    env.add_template("unsupported_handle.html", UNSUPPORTED_HANDLE_HTML).expect("valid template");
    env.add_template("whitelist_verification_sent.txt", WHITELIST_VERIFICATION_SENT_TEXT).expect("valid template");
    env.add_template("whitelist_verification_sent.html", WHITELIST_VERIFICATION_SENT_HTML).expect("valid template");
    env.add_template("whitelist_verification_failed.txt", WHITELIST_VERIFICATION_FAILED_TEXT)
        .expect("valid template");
    env.add_template("whitelist_verification_failed.html", WHITELIST_VERIFICATION_FAILED_HTML)
        .expect("valid template");
    env.add_template("rate_limit_exceeded.txt", RATE_LIMIT_EXCEEDED_TEXT).expect("valid template");
    env.add_template("rate_limit_exceeded.html", RATE_LIMIT_EXCEEDED_HTML).expect("valid template");
    env
});

fn render(name: &str, ctx: impl Serialize) -> String {
    ENV.get_template(name)
        .and_then(|tpl| tpl.render(ctx))
        .unwrap_or_else(|e| format!("(failed to render rejection template '{name}': {e})"))
}

/// A plain-text / HTML pair ready to hand to the `EmailDeliverer`.
pub struct RejectionBody {
    pub text: String,
    pub html: String,
}

#[must_use]
pub fn too_many_attachments(received: usize, max_allowed: usize) -> RejectionBody {
    let ctx = context! { received, max_allowed };
    RejectionBody {
        text: render("too_many_attachments.txt", &ctx),
        html: render("too_many_attachments.html", &ctx),
    }
}

#[must_use]
pub fn attachment_too_large(filename: &str, size_bytes: u64, max_allowed_bytes: u64) -> RejectionBody {
    let size_mb = format!("{:.1}", size_bytes as f64 / (1024.0 * 1024.0));
    let max_allowed_mb = max_allowed_bytes / (1024 * 1024);
    let ctx = context! { filename, size_mb, max_allowed_mb };
    RejectionBody { text: render("attachment_too_large.txt", &ctx), html: render("attachment_too_large.html", &ctx) }
}

#[must_use]
pub fn unsupported_attachment_type(filename: &str, content_type: &str) -> RejectionBody {
    let ctx = context! { filename, content_type };
    RejectionBody {
        text: render("unsupported_attachment_type.txt", &ctx),
        html: render("unsupported_attachment_type.html", &ctx),
    }
}

#[must_use]
pub fn unsupported_handle(handle: &str, known_handles: &[&str], docs_url: &str) -> RejectionBody {
    let known_handles = known_handles.join(", ");
    let ctx = context! { handle, known_handles, docs_url };
    RejectionBody { text: render("unsupported_handle.txt", &ctx), html: render("unsupported_handle.html", &ctx) }
}

#[must_use]
pub fn whitelist_verification_sent(from_email: &str) -> RejectionBody {
    let ctx = context! { from_email };
    RejectionBody {
        text: render("whitelist_verification_sent.txt", &ctx),
        html: render("whitelist_verification_sent.html", &ctx),
    }
}

#[must_use]
pub fn whitelist_verification_failed(signup_url: &str) -> RejectionBody {
    let ctx = context! { signup_url };
    RejectionBody {
        text: render("whitelist_verification_failed.txt", &ctx),
        html: render("whitelist_verification_failed.html", &ctx),
    }
}

#[must_use]
pub fn rate_limit_exceeded(limit_type: &str, upgrade_hint: Option<&str>) -> RejectionBody {
    let ctx = context! { limit_type, upgrade_hint };
    RejectionBody { text: render("rate_limit_exceeded.txt", &ctx), html: render("rate_limit_exceeded.html", &ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_attachments_interpolates_counts() {
        let body = too_many_attachments(7, 5);
        assert!(body.text.contains("Maximum allowed attachments: 5"));
        assert!(body.text.contains("Number of attachments in your email: 7"));
        assert!(body.html.contains("5"));
    }

    #[test]
    fn attachment_too_large_formats_megabytes() {
        let body = attachment_too_large("report.pdf", 20 * 1024 * 1024, 15 * 1024 * 1024);
        assert!(body.text.contains("report.pdf"));
        assert!(body.text.contains("20.0MB"));
        assert!(body.text.contains("15MB"));
    }

    #[test]
    fn unsupported_attachment_type_names_filename_and_type() {
        let body = unsupported_attachment_type("invoice.exe", "application/x-msdownload");
        assert!(body.text.contains("invoice.exe"));
        assert!(body.text.contains("application/x-msdownload"));
    }

    #[test]
    fn unsupported_handle_lists_known_handles() {
        let body = unsupported_handle("bogus", &["ask", "summarize"], "https://handlemail.example/docs");
        assert!(body.text.contains("bogus"));
        assert!(body.text.contains("ask, summarize"));
    }

    #[test]
    fn rate_limit_exceeded_omits_upgrade_hint_when_absent() {
        let body = rate_limit_exceeded("sender hour for beta plan", None);
        assert!(!body.text.contains("Upgrade"));
        let with_hint = rate_limit_exceeded("sender hour for beta plan", Some("https://handlemail.example/upgrade"));
        assert!(with_hint.text.contains("Upgrade your plan"));
    }
}
