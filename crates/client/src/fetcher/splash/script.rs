//! Lua sources and `execute` arguments.

use serde_json::{Map, Value};
use trawl_core::{Error, FetchRequest};
use trawl_core::config::SplashConfig;

/// Navigates, optionally posting form data and seeding cookies, waits for
/// scripts, optionally scrolls, then reports the last history entry.
pub const PAGE_SCRIPT: &str = r#"
json = require("json")

function main(splash)
  local method = "GET"
  local formdata = nil
  if splash.args.formdata and splash.args.formdata ~= "" then
    formdata = json.decode(splash.args.formdata)
    method = "POST"
  end
  local headers = nil
  if splash.args.headers and splash.args.headers ~= "" then
    headers = json.decode(splash.args.headers)
  end
  if splash.args.cookies and splash.args.cookies ~= "" then
    for _, cookie in ipairs(json.decode(splash.args.cookies)) do
      splash:add_cookie(cookie)
    end
  end

  local ok, reason = splash:go{splash.args.url, http_method = method, formdata = formdata, headers = headers}
  if not ok then
    return {error = reason}
  end
  local wait = tonumber(splash.args.wait)
  assert(splash:wait(wait))
  if splash.args.scroll == "true" then
    splash:runjs("window.scrollTo(0, document.body.scrollHeight)")
    assert(splash:wait(wait))
  end

  local entries = splash:history()
  local last = entries[#entries]
  local request, response = nil, nil
  if last then
    request = last.request
    response = last.response
  end
  return {
    url = splash:url(),
    request = request,
    response = response,
    cookies = splash:get_cookies(),
    html = splash:html(),
  }
end
"#;

/// Plain GET without a page; the body comes back base64-encoded.
pub const ROBOTS_SCRIPT: &str = r#"
function main(splash)
  local response = splash:http_get(splash.args.url)
  return {
    url = splash.args.url,
    request = response.request.info,
    response = response.info,
  }
end
"#;

/// Pick the script for `request`: robots.txt, caller-supplied, or default.
pub fn select(request: &FetchRequest) -> &str {
    if request.is_robots_txt() {
        return ROBOTS_SCRIPT;
    }
    match request {
        FetchRequest::Rendered(r) => r.lua.as_deref().filter(|l| !l.trim().is_empty()).unwrap_or(PAGE_SCRIPT),
        _ => PAGE_SCRIPT,
    }
}

/// Form data `k=v&k2=v2` as a JSON object for `splash:go{formdata=...}`.
pub fn form_json(raw: &str) -> String {
    let map: Map<String, Value> = url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    Value::Object(map).to_string()
}

/// Query arguments for `GET /execute`. Values are escaped by the client.
pub fn execute_args(
    request: &FetchRequest, config: &SplashConfig, user_agent: &str,
) -> Result<Vec<(&'static str, String)>, Error> {
    let url = request.parsed_url()?;
    let (wait, scroll) = match request {
        FetchRequest::Rendered(r) => (r.wait.filter(|w| *w > 0.0).unwrap_or(config.wait_secs), r.scroll),
        _ => (config.wait_secs, false),
    };

    let mut args = vec![
        ("url", url.to_string()),
        ("timeout", config.timeout_secs.to_string()),
        ("resource_timeout", config.resource_timeout_secs.to_string()),
        ("wait", wait.to_string()),
        ("scroll", scroll.to_string()),
        ("headers", serde_json::json!({ "User-Agent": user_agent }).to_string()),
    ];
    if !request.cookies().is_empty() {
        args.push(("cookies", serde_json::to_string(request.cookies())?));
    }
    if let Some(form) = request.form_data() {
        args.push(("formdata", form_json(form)));
    }
    args.push(("lua_source", select(request).to_string()));
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawl_core::Cookie;

    fn arg<'a>(args: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        args.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_select_script() {
        assert_eq!(select(&FetchRequest::rendered("http://example.com/robots.txt")), ROBOTS_SCRIPT);
        assert_eq!(select(&FetchRequest::rendered("http://example.com")), PAGE_SCRIPT);

        let custom: FetchRequest = serde_json::from_str(
            r#"{"type":"splash","url":"http://example.com","lua":"function main(splash) return {} end"}"#,
        )
        .unwrap();
        assert!(select(&custom).contains("return {}"));
    }

    #[test]
    fn test_form_json() {
        let json: serde_json::Value = serde_json::from_str(&form_json("user=a%20b&pass=x")).unwrap();
        assert_eq!(json["user"], "a b");
        assert_eq!(json["pass"], "x");
    }

    #[test]
    fn test_execute_args() {
        let config = SplashConfig::default();
        let request: FetchRequest = serde_json::from_str(
            r#"{"type":"splash","url":"http://example.com/login","formData":"u=1","wait":2.0,"scroll":true}"#,
        )
        .unwrap();
        let request = request.with_cookies(vec![Cookie::new("sid", "1")]);
        let args = execute_args(&request, &config, "trawl-test").unwrap();

        assert_eq!(arg(&args, "url"), Some("http://example.com/login"));
        assert_eq!(arg(&args, "wait"), Some("2"));
        assert_eq!(arg(&args, "scroll"), Some("true"));
        assert_eq!(arg(&args, "timeout"), Some(config.timeout_secs.to_string().as_str()));
        assert!(arg(&args, "cookies").unwrap().contains("\"sid\""));
        assert_eq!(arg(&args, "formdata"), Some(r#"{"u":"1"}"#));
        assert!(arg(&args, "headers").unwrap().contains("trawl-test"));
        assert_eq!(arg(&args, "lua_source"), Some(PAGE_SCRIPT));
    }

    #[test]
    fn test_execute_args_defaults() {
        let args = execute_args(&FetchRequest::rendered("http://example.com"), &SplashConfig::default(), "ua").unwrap();
        assert_eq!(arg(&args, "wait"), Some("0.5"));
        assert!(arg(&args, "cookies").is_none());
        assert!(arg(&args, "formdata").is_none());
    }

    #[test]
    fn test_execute_args_rejects_bad_url() {
        assert!(execute_args(&FetchRequest::rendered("not a url"), &SplashConfig::default(), "ua").is_err());
    }
}
