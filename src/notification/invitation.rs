//! Invitation email content and redemption links.
//!
//! Everything here is pure: the same inputs always render the same email.

use url::Url;

use crate::models::relation::Relation;

/// Path of the public confirmation page that consumes `?token=`.
pub const APPROVE_PAGE_PATH: &str = "/approval-status/approve-page";

#[derive(Debug, Clone, PartialEq)]
pub struct InvitationEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Builds redemption links against the deployment's public base URL.
#[derive(Debug, Clone)]
pub struct InvitationLinks {
    base: Url,
}

impl InvitationLinks {
    pub fn new(public_base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(public_base_url)
            .map_err(|e| anyhow::anyhow!("invalid public base URL '{}': {}", public_base_url, e))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            anyhow::bail!("public base URL must be http(s): {}", public_base_url);
        }
        Ok(Self { base })
    }

    pub fn approval_link(&self, token: &str) -> String {
        let mut url = self.base.clone();
        // Keep any path prefix the deployment is mounted under.
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", prefix, APPROVE_PAGE_PATH));
        url.set_query(None);
        url.query_pairs_mut().append_pair("token", token);
        url.to_string()
    }
}

pub fn relation_message(relation: Relation) -> &'static str {
    match relation {
        Relation::Members => "You are invited to join as a member.",
        Relation::Encadrants => "You are invited to participate as an encadrant.",
        Relation::JuryMembers => "You are invited to join as a jury member.",
        _ => "You are invited to collaborate on the project.",
    }
}

pub fn render_invitation(project_name: &str, relation: Relation, link: &str) -> InvitationEmail {
    let message = relation_message(relation);
    let subject = format!("Invitation to Join Project: {}", project_name);

    let text = format!(
        "Hello,\n\n\
         You have been invited to join the project: {project_name}.\n\
         {message}\n\n\
         Please click the link below to approve your participation:\n\n\
         {link}\n\n\
         Thank you!\n"
    );

    let name = escape_html(project_name);
    let href = escape_html(link);
    let html = format!(
        "<p>Hello,</p>\n\
         <p>You have been invited to join the project: <strong>{name}</strong>.</p>\n\
         <p>{message}</p>\n\
         <p>Please click the link below to approve your participation:</p>\n\
         <a href=\"{href}\">{href}</a>\n\
         <p>Thank you!</p>\n"
    );

    InvitationEmail {
        subject,
        text,
        html,
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
