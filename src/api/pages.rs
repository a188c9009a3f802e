//! Server-rendered pages for invitees following an emailed link.

use crate::models::approval::ApprovalDetails;
use crate::notification::invitation::escape_html;

const STYLE: &str = r#"
      body {
        font-family: Arial, sans-serif;
        line-height: 1.6;
        margin: 0;
        padding: 20px;
        background-color: #f5f5f5;
        display: flex;
        justify-content: center;
        align-items: center;
        min-height: 100vh;
      }
      .container {
        background-color: white;
        padding: 30px;
        border-radius: 10px;
        box-shadow: 0 2px 10px rgba(0,0,0,0.1);
        max-width: 600px;
        width: 100%;
      }
      h1 { color: #333; margin-bottom: 20px; text-align: center; }
      h1.error { color: #dc3545; }
      .info { margin-bottom: 25px; padding: 15px; background-color: #f8f9fa; border-radius: 5px; }
      .buttons { display: flex; justify-content: center; gap: 15px; margin-top: 30px; }
      .button {
        padding: 12px 25px;
        border: none;
        border-radius: 5px;
        cursor: pointer;
        font-size: 16px;
        font-weight: bold;
        color: white;
      }
      .approve { background-color: #28a745; }
      .approve:hover { background-color: #218838; }
      .reject { background-color: #dc3545; }
      .reject:hover { background-color: #c82333; }
      .error-message { color: #666; margin-bottom: 25px; text-align: center; }
"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <title>{title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>{STYLE}</style>
  </head>
  <body>
    <div class="container">
{body}
    </div>
  </body>
</html>
"#
    )
}

/// Confirmation page with approve / reject buttons. The buttons POST to the
/// sibling `approve` and `reject` routes, so the page works under any prefix.
pub fn approval_page(details: &ApprovalDetails) -> String {
    let body = format!(
        r#"      <h1>Project Invitation Approval</h1>
      <div class="info">
        <p><strong>Project:</strong> {project}</p>
        <p><strong>Invited User:</strong> {name} ({email})</p>
        <p><strong>Role:</strong> {relation}</p>
      </div>
      <div class="buttons" data-token="{token}">
        <button class="button approve" onclick="decide('approve')">Approve</button>
        <button class="button reject" onclick="decide('reject')">Reject</button>
      </div>
      <p id="result" class="error-message"></p>
      <script>
        async function decide(action) {{
          const token = document.querySelector('.buttons').dataset.token;
          const result = document.getElementById('result');
          try {{
            const response = await fetch(action + '?token=' + encodeURIComponent(token), {{ method: 'POST' }});
            if (response.ok) {{
              result.textContent = action === 'approve'
                ? 'Invitation approved successfully!'
                : 'Invitation rejected.';
              document.querySelector('.buttons').remove();
            }} else {{
              result.textContent = 'This invitation is invalid or has expired.';
            }}
          }} catch (error) {{
            result.textContent = 'An error occurred. Please try again.';
          }}
        }}
      </script>"#,
        project = escape_html(&details.project_name),
        name = escape_html(&details.user_name),
        email = escape_html(&details.user_email),
        relation = escape_html(details.relation.as_str()),
        token = escape_html(&details.token),
    );
    layout("Project Invitation Approval", &body)
}

pub fn error_page(message: &str) -> String {
    let body = format!(
        r#"      <h1 class="error">Error</h1>
      <div class="error-message">{}</div>"#,
        escape_html(message)
    );
    layout("Error", &body)
}
