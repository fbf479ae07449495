use lri_core::Payload;
use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    std::process::exit(4);
}

pub fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Execute an API request, print response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
    extra_headers: &[(String, String)],
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(u) => u,
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{path}: {e}")
            });
            eprintln!("{}", pretty(&err));
            return 4;
        }
    };

    let mut req = client().request(method, url);
    for (k, v) in extra_headers {
        req = req.header(k.as_str(), v.as_str());
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check LRI_API_URL."
            });
            eprintln!("{}", pretty(&err));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for(status);

    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{}", pretty(&json!({"error": "connection_error", "message": format!("{e}")})));
            return 3;
        }
    };
    // 204 carries no body
    let output = if bytes.is_empty() {
        json!({"status": status})
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(
            |e| json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
        )
    };

    if exit_code == 0 {
        println!("{}", pretty(&output));
    } else {
        eprintln!("{}", pretty(&output));
    }
    exit_code
}

pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Read text from a file path or stdin (when path is "-").
pub fn read_input(path: &str) -> Result<String, String> {
    if path == "-" {
        std::io::read_to_string(std::io::stdin()).map_err(|e| format!("Failed to read stdin: {e}"))
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))
    }
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<serde_json::Value, String> {
    let raw = read_input(path)?;
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}

/// Printable view of a payload: JSON as-is, UTF-8 as a string, otherwise hex.
pub fn payload_json(payload: &Payload) -> serde_json::Value {
    payload
        .json()
        .or_else(|| payload.text().map(serde_json::Value::String))
        .unwrap_or_else(|| json!({ "hex": hex::encode(payload.to_bytes()) }))
}
