//! Server-rendered HTML for the landing, subscribe and result pages.

use lib_trends::models::{Repository, Snapshot, Subscriber};
use std::fmt::Write;
use std::sync::Arc;

/// Repositories listed on the landing page.
pub const LANDING_TOP: usize = 20;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<link rel=\"stylesheet\" href=\"/style.css\">\n</head>\n\
         <body>\n<nav><a href=\"/\">Trends</a> | <a href=\"/subscribe\">Subscribe</a></nav>\n{}</body>\n</html>\n",
        escape(title),
        body
    )
}

fn repository_row(out: &mut String, rank: usize, repo: &Repository) {
    let _ = write!(
        out,
        "<tr><td>{}</td><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>\n",
        rank,
        escape(&repo.html_url),
        escape(&repo.full_name),
        escape(repo.language.as_deref().unwrap_or("-")),
        repo.stars,
        repo.trend_score,
        escape(repo.description.as_deref().unwrap_or("")),
    );
}

pub fn landing(snapshot: &Snapshot) -> String {
    let mut body = String::from("<h1>Trending repositories</h1>\n");
    if snapshot.is_empty() {
        body.push_str("<p>No data yet. The first refresh is in progress.</p>\n");
        return layout("Trending repositories", &body);
    }

    let _ = write!(
        body,
        "<p>Generation {} refreshed at {}.</p>\n<table>\n\
         <tr><th>#</th><th>Repository</th><th>Language</th><th>Stars</th><th>Score</th><th>Description</th></tr>\n",
        snapshot.generation(),
        snapshot.created_at().format("%Y-%m-%d %H:%M UTC"),
    );
    let top: Vec<&Arc<Repository>> = snapshot.repositories().iter().take(LANDING_TOP).collect();
    for (pos, repo) in top.into_iter().enumerate() {
        repository_row(&mut body, pos + 1, repo);
    }
    body.push_str("</table>\n");
    layout("Trending repositories", &body)
}

pub fn subscribe_form() -> String {
    let body = "<h1>Email digest</h1>\n\
        <form method=\"post\" action=\"/subscribed\">\n\
        <label>Email <input type=\"email\" name=\"email\" required></label>\n\
        <label>Language <input type=\"text\" name=\"language\" placeholder=\"any\"></label>\n\
        <label>Minimum stars <input type=\"number\" name=\"min_stars\" min=\"0\"></label>\n\
        <button type=\"submit\">Subscribe</button>\n\
        </form>\n";
    layout("Subscribe", body)
}

pub fn subscribed(subscriber: &Subscriber) -> String {
    let mut body = String::from("<h1>Subscribed</h1>\n");
    let _ = write!(body, "<p>Digests will be sent to {}", escape(&subscriber.email));
    if let Some(ref language) = subscriber.filter.language {
        let _ = write!(body, " for {} repositories", escape(language));
    }
    if let Some(min) = subscriber.filter.min_stars {
        let _ = write!(body, " with at least {min} stars");
    }
    let _ = write!(
        body,
        ".</p>\n<p><a href=\"/unsubscribe?token={}\">Unsubscribe</a></p>\n",
        escape(&subscriber.token)
    );
    layout("Subscribed", &body)
}

pub fn unsubscribed(email: Option<&str>) -> String {
    let body = match email {
        Some(email) => format!("<h1>Unsubscribed</h1>\n<p>{} will no longer receive digests.</p>\n", escape(email)),
        None => "<h1>Unknown token</h1>\n<p>No subscription matches this link.</p>\n".to_string(),
    };
    layout("Unsubscribe", &body)
}

pub fn rejected(reason: &str) -> String {
    let body = format!(
        "<h1>Subscription failed</h1>\n<p>{}</p>\n<p><a href=\"/subscribe\">Try again</a></p>\n",
        escape(reason)
    );
    layout("Subscription failed", &body)
}
