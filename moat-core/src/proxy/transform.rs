//! Response transformers: pure, side-effect-free (on the request) functions
//! that may replace a response body. Chained in registration order per
//! host; each transformer reports whether it actually changed anything.

use bytes::Bytes;
use http::request;
use std::sync::Arc;

pub type HttpResponse = http::Response<Bytes>;

/// Marker header set on any response a transformer has synthesized, so
/// downstream logging can tell a real upstream response from a fabricated
/// one.
pub const TRANSFORMED_HEADER: &str = "X-Moat-Transformed";

/// 512 KiB scrub limit: bodies (or the chunked prefix read) larger than
/// this are passed through untransformed rather than buffered in full.
pub const SCRUB_LIMIT_BYTES: usize = 512 * 1024;

type TransformFn = Arc<dyn Fn(&request::Parts, HttpResponse) -> (HttpResponse, bool) + Send + Sync>;

/// A single named, chainable transformer.
#[derive(Clone)]
pub struct ResponseTransformer {
    pub name: &'static str,
    func: TransformFn,
}

impl ResponseTransformer {
    pub fn new(
        name: &'static str,
        func: impl Fn(&request::Parts, HttpResponse) -> (HttpResponse, bool) + Send + Sync + 'static,
    ) -> Self {
        Self { name, func: Arc::new(func) }
    }

    pub fn apply(&self, request: &request::Parts, response: HttpResponse) -> (HttpResponse, bool) {
        (self.func)(request, response)
    }
}

/// Run a registration-ordered chain of transformers over one response.
/// Each transformer sees the output of the previous one.
pub fn apply_chain(
    transformers: &[ResponseTransformer],
    request: &request::Parts,
    mut response: HttpResponse,
) -> (HttpResponse, bool) {
    let mut any = false;
    for t in transformers {
        let (next, changed) = t.apply(request, response);
        response = next;
        any = any || changed;
    }
    (response, any)
}

/// The Anthropic OAuth-scope workaround: Anthropic's OAuth tokens lack
/// scope for `/api/oauth/profile` and `/api/oauth/usage`, which Claude Code
/// polls opportunistically and otherwise treats a 403 there as fatal. This
/// transformer only fires on exactly those two paths with a 403 response.
pub fn anthropic_oauth_workaround() -> ResponseTransformer {
    ResponseTransformer::new("oauth-scope-workaround", |req, response| {
        if response.status() != http::StatusCode::FORBIDDEN {
            return (response, false);
        }
        let path = req.uri.path();
        let body = match path {
            "/api/oauth/profile" => Some(br#"{"id":"","email":"","name":""}"#.to_vec()),
            "/api/oauth/usage" => Some(br#"{"usage":{}}"#.to_vec()),
            _ => None,
        };
        let Some(body) = body else { return (response, false) };
        let synthetic = http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(TRANSFORMED_HEADER, "oauth-scope-workaround")
            .body(Bytes::from(body))
            .expect("well-formed synthetic response");
        (synthetic, true)
    })
}

fn content_type_is_scrubbable(response: &HttpResponse) -> bool {
    response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json") || ct.contains("text"))
        .unwrap_or(false)
}

fn is_compressed(response: &HttpResponse) -> bool {
    response
        .headers()
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|enc| !enc.is_empty() && enc != "identity")
        .unwrap_or(false)
}

/// Replace every occurrence of `real` with `placeholder` in-place.
fn scrub_bytes(body: &[u8], real: &[u8], placeholder: &[u8]) -> (Vec<u8>, bool) {
    if real.is_empty() || body.len() < real.len() {
        return (body.to_vec(), false);
    }
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    let mut changed = false;
    while i < body.len() {
        if body[i..].starts_with(real) {
            out.extend_from_slice(placeholder);
            i += real.len();
            changed = true;
        } else {
            out.push(body[i]);
            i += 1;
        }
    }
    (out, changed)
}

/// The config-driven token scrubber: replaces a real token with its
/// placeholder in JSON/text response bodies up to the scrub limit. Skips
/// compressed bodies entirely (open design decision: gzip/brotli bodies
/// are never scrubbed). If no substitution was made, the body is restored
/// unchanged rather than left partially processed.
pub fn token_scrubber(real_token: String, placeholder: String) -> ResponseTransformer {
    ResponseTransformer::new("token-scrubber", move |_req, response| {
        if !content_type_is_scrubbable(&response) || is_compressed(&response) {
            return (response, false);
        }
        let body = response.body();
        if body.len() > SCRUB_LIMIT_BYTES {
            return (response, false);
        }
        let (scrubbed, changed) = scrub_bytes(body, real_token.as_bytes(), placeholder.as_bytes());
        if !changed {
            return (response, false);
        }
        let (mut parts, _) = response.into_parts();
        parts.headers.remove(http::header::CONTENT_LENGTH);
        (http::Response::from_parts(parts, Bytes::from(scrubbed)), true)
    })
}
