use super::delivery::Email;
use crate::events::NotificationMessage;

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn subject(site: &str) -> String {
    format!("[CRITICAL] {site} DOWN - Action Required")
}

/// Render the "endpoint down" email for one message
pub fn render_down_alert(message: &NotificationMessage) -> Email {
    let site = escape_html(&message.site);
    let time = escape_html(&message.time);

    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Critical Alert</title>
    <style>
        body {{ font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }}
        .container {{ max-width: 600px; margin: 0 auto; background-color: #ffffff; border-radius: 8px; overflow: hidden; }}
        .header {{ background-color: #dc3545; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 30px; }}
        .badge {{ display: inline-block; background-color: #dc3545; color: white; padding: 8px 16px; border-radius: 20px; font-weight: bold; }}
        .details {{ background-color: #f8f9fa; padding: 20px; border-radius: 6px; border-left: 4px solid #dc3545; }}
        .label {{ font-weight: bold; color: #495057; }}
        .footer {{ background-color: #f8f9fa; padding: 20px; text-align: center; color: #6c757d; font-size: 14px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header"><h1>Critical problem detected</h1></div>
        <div class="content">
            <div class="details">
                <p><span class="label">Service:</span> {site}</p>
                <p><span class="label">Status:</span> <span class="badge">DOWN</span></p>
                <p><span class="label">Detected at:</span> {time}</p>
                <p><span class="label">Problem:</span> The service is not responding to requests</p>
            </div>
            <h4>Immediate action required:</h4>
            <ul>
                <li>Check the server status</li>
                <li>Review the system logs</li>
                <li>Notify the on-call team</li>
                <li>Prepare a recovery plan</li>
            </ul>
        </div>
        <div class="footer">
            <p>This is an automated notification from PingTower monitoring.</p>
        </div>
    </div>
</body>
</html>"#
    );

    let text_body = format!(
        "CRITICAL PROBLEM DETECTED\n\n\
         Service: {}\n\
         Status: DOWN\n\
         Detected at: {}\n\n\
         The service is not responding to requests.\n\n\
         What to do:\n\
         1. Check the server status\n\
         2. Review the system logs\n\
         3. Notify the on-call team\n\
         4. Prepare a recovery plan\n\n\
         ---\n\
         This is an automated notification from PingTower monitoring.\n",
        message.site, message.time
    );

    Email { to: message.email.clone(), subject: subject(&message.site), html_body, text_body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_down_alert() {
        let message = NotificationMessage {
            email: "ops@example.com".into(),
            site: "https://shop.example/?a=1&b=<2>".into(),
            time: "2025-03-01 12:30:05 UTC".into(),
        };

        let email = render_down_alert(&message);
        assert_eq!(email.to, "ops@example.com");
        assert_eq!(email.subject, "[CRITICAL] https://shop.example/?a=1&b=<2> DOWN - Action Required");

        assert!(email.html_body.contains("https://shop.example/?a=1&amp;b=&lt;2&gt;"));
        assert!(!email.html_body.contains("<2>"));
        assert!(email.html_body.contains("2025-03-01 12:30:05 UTC"));
        assert!(email.html_body.contains(">DOWN<"));

        assert!(email.text_body.contains("Service: https://shop.example/?a=1&b=<2>"));
        assert!(email.text_body.contains("Status: DOWN"));
    }
}
