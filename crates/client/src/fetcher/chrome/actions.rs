//! Post-load page actions.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::RemoveNodeParams;
use chromiumoxide::cdp::js_protocol::runtime::{CompileScriptParams, ExceptionDetails, RunScriptParams};
use futures_util::future::try_join_all;
use trawl_core::model::BrowserAction;

use super::RenderError;

/// Pause after a click or scroll so the page can react.
const SETTLE: Duration = Duration::from_millis(750);

fn quoted(selector: &str) -> String {
    serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into())
}

/// Click the first match or throw.
pub fn click_script(selector: &str) -> String {
    let sel = quoted(selector);
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) {{ throw new Error('no element matches ' + {sel}); }} \
         el.click(); return true; }})()"
    )
}

/// Click the first match if present. Evaluates to whether it clicked.
pub fn next_page_script(selector: &str) -> String {
    let sel = quoted(selector);
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) {{ return false; }} \
         el.scrollIntoView(); el.click(); return true; }})()"
    )
}

pub const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight); true";

/// Error for a script that threw: the exception description when the
/// browser sent one, else the summary text.
fn script_failure(details: &ExceptionDetails) -> RenderError {
    let message = details.exception.as_ref().and_then(|e| e.description.clone()).unwrap_or_else(|| details.text.clone());
    RenderError::Action(message)
}

/// Compile `source` in the page and run it, returning its value.
pub async fn run_script(page: &Page, source: String) -> Result<Option<serde_json::Value>, RenderError> {
    let compiled = page.execute(CompileScriptParams::new(source, "trawl://action", false)).await?;
    if let Some(details) = &compiled.result.exception_details {
        return Err(script_failure(details));
    }
    let script_id =
        compiled.result.script_id.clone().ok_or_else(|| RenderError::Action("script did not compile".into()))?;

    let params = RunScriptParams::builder()
        .script_id(script_id)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(RenderError::Action)?;
    let ran = page.execute(params).await?;
    if let Some(details) = &ran.result.exception_details {
        return Err(script_failure(details));
    }
    Ok(ran.result.result.value.clone())
}

/// Remove every node matching `selector`, concurrently.
pub async fn remove_nodes(page: &Page, selector: &str) -> Result<usize, RenderError> {
    let elements = page.find_elements(selector).await?;
    let count = elements.len();
    try_join_all(elements.into_iter().map(|el| page.execute(RemoveNodeParams::new(el.node_id)))).await?;
    Ok(count)
}

/// Run `actions` in order against the loaded page.
pub async fn run(page: &Page, actions: &[BrowserAction]) -> Result<(), RenderError> {
    for action in actions {
        match action {
            BrowserAction::Click { element } => {
                run_script(page, click_script(element)).await?;
                tokio::time::sleep(SETTLE).await;
            }
            BrowserAction::Paginate { selector, pages } => {
                for page_no in 0..*pages {
                    let clicked = run_script(page, next_page_script(selector)).await?;
                    if clicked != Some(serde_json::Value::Bool(true)) {
                        tracing::debug!(selector, page_no, "pagination stopped, no next element");
                        break;
                    }
                    tokio::time::sleep(SETTLE).await;
                }
            }
            BrowserAction::Scroll { times } => {
                for _ in 0..*times {
                    run_script(page, SCROLL_SCRIPT.to_string()).await?;
                    tokio::time::sleep(SETTLE).await;
                }
            }
            BrowserAction::Remove { selector } => {
                let removed = remove_nodes(page, selector).await?;
                tracing::debug!(selector, removed, "removed nodes");
            }
        }
    }
    Ok(())
}
