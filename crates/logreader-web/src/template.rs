use axum::response::Html;
use minijinja::{Environment, context};
use once_cell::sync::Lazy;

const INDEX_HTML: &str = include_str!("../../../templates/index.html");

/// Templates named `*.html` are auto-escaped, so anything placed in the
/// output slot is treated as text.
static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.add_template("index.html", INDEX_HTML)
        .expect("index.html is a valid template");
    env
});

/// Render the index page with `output` in the result area.
pub fn render_index(output: &str) -> Html<String> {
    let rendered = TEMPLATES
        .get_template("index.html")
        .and_then(|t| t.render(context! { output }));
    match rendered {
        Ok(html) => Html(html),
        Err(e) => {
            tracing::error!(error = %e, "failed to render index template");
            Html(String::from("<!doctype html><p>Internal template error</p>"))
        }
    }
}
