use std::path::Path;

use minijinja::{Environment, context};
use tracing::error;

use crate::constants::RECOMMENDED_BROWSERS;
use crate::error::WardenError;
use crate::proxy::sniffer::Browser;

/// User-facing failure pages, rendered from the on-disk templates at the
/// configured paths. Pages always carry a refresh hint and never leak
/// internals.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    /// Load both templates up front so a bad path is a startup error, not a
    /// per-request one.
    pub fn load(error_page: &Path, warn_page: &Path) -> Result<Self, WardenError> {
        let mut env = Environment::new();
        for (name, path) in [("error", error_page), ("warn", warn_page)] {
            let source = std::fs::read_to_string(path).map_err(|e| {
                WardenError::Template(format!("Failed to read {}: {e}", path.display()))
            })?;
            env.add_template_owned(name.to_string(), source).map_err(|e| {
                WardenError::Template(format!("Failed to parse {}: {e}", path.display()))
            })?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> String {
        match self.env.get_template(name).and_then(|t| t.render(ctx)) {
            Ok(html) => html,
            Err(e) => {
                error!("Failed to render {name} template: {e}");
                // Plain fallback so the client still gets a page
                "<html><body><h1>Something went wrong</h1></body></html>".to_string()
            }
        }
    }

    /// 503 page shown when the upstream cannot be reached.
    pub fn service_unavailable(&self) -> String {
        self.render(
            "error",
            context! {
                title => "Service Unavailable",
                summary => r"Unable to connect to the server ¯\_(ツ)_/¯",
                help => "Nothing to do here!!\n\nSit back and relax while the server is napping.",
                refresh_interval => 60,
            },
        )
    }

    /// 403 page identifying the rejected origin.
    pub fn forbidden(&self, origin: &str) -> String {
        self.render(
            "error",
            context! {
                title => "Forbidden",
                summary => "You don't have permission to access this resource",
                help => format!("Requests from {origin:?} are not allowed"),
                refresh_interval => 86_400,
            },
        )
    }

    /// 200 warning page naming the unsupported browser.
    pub fn unsupported_browser(&self, browser: &Browser) -> String {
        self.render(
            "warn",
            context! {
                browser_name => browser.family,
                browser_version => browser.version,
                recommendation => RECOMMENDED_BROWSERS,
                refresh_interval => 30,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> Templates {
        Templates::load(
            Path::new("templates/error.html"),
            Path::new("templates/warn.html"),
        )
        .unwrap()
    }

    #[test]
    fn test_service_unavailable_page() {
        let html = templates().service_unavailable();
        assert!(html.contains("Service Unavailable"));
        assert!(html.contains("content=\"60\""));
    }

    #[test]
    fn test_forbidden_page_names_origin() {
        let html = templates().forbidden("evil.example");
        assert!(html.contains("evil.example"));
        assert!(html.contains("content=\"86400\""));
    }

    #[test]
    fn test_unsupported_browser_page() {
        let browser = Browser {
            family: "Chrome",
            version: "120.0".to_string(),
        };
        let html = templates().unsupported_browser(&browser);
        assert!(html.contains("Chrome"));
        assert!(html.contains("120.0"));
        assert!(html.contains("Firefox or Safari"));
    }

    #[test]
    fn test_missing_template_is_a_startup_error() {
        assert!(Templates::load(Path::new("no/such/file.html"), Path::new("templates/warn.html")).is_err());
    }
}
