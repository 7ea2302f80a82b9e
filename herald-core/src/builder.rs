//! Request builder.
//!
//! Turns a resolved [`Descriptor`] and the actual call arguments into a
//! [`Request`]. Building runs in two phases:
//!
//! 1. validation, run once per descriptor instance and memoized;
//! 2. compilation, an ordered pipeline of handlers that each fill one part
//!    of the request.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::HeaderMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::argument::{Argument, render_value};
use crate::descriptor::{Descriptor, RequestMethod, ResponseType};
use crate::multipart::MultipartForm;
use crate::request::{Request, RequestBody};
use crate::{HeraldError, Result};

/// `:name` path tokens.
static PATH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_\-]*)").expect("valid path token regex"));

/// Runs of slashes that are not part of a `scheme://` prefix.
static DUPLICATE_SLASHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^:]|^)/{2,}").expect("valid slash regex"));

/// Order of the config-merge handler. It always runs last.
pub const CONFIG_MERGE_ORDER: i32 = 9999;

/// A structural check on a descriptor.
pub trait DescriptorValidator: Send + Sync {
    /// Reject the descriptor with a descriptive error.
    fn validate(&self, descriptor: &Descriptor) -> Result<()>;
}

/// One stage of the compilation pipeline.
pub trait RequestHandler: Send + Sync {
    /// Position in the pipeline; smaller runs first, ties keep insertion order.
    fn order(&self) -> i32;

    /// Write this stage's part of the request.
    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()>;
}

/// Validates descriptors and compiles them into requests.
pub struct RequestBuilder {
    validators: Vec<Box<dyn DescriptorValidator>>,
    handlers: Vec<Box<dyn RequestHandler>>,
    validated: Mutex<HashMap<usize, Weak<Descriptor>>>,
}

impl RequestBuilder {
    /// Create a builder with the standard validators and handlers.
    pub fn new() -> Self {
        let mut builder = Self {
            validators: vec![
                Box::new(PathVariables),
                Box::new(NoPayloadOnGet),
                Box::new(SingleEncoding),
                Box::new(DistinctPositions),
                Box::new(KnownResponseType),
            ],
            handlers: Vec::new(),
            validated: Mutex::new(HashMap::new()),
        };

        builder
            .with_handler(BasePath)
            .with_handler(PathSubstitution)
            .with_handler(QueryString)
            .with_handler(Headers)
            .with_handler(JsonBody)
            .with_handler(FormBody)
            .with_handler(MultipartBody)
            .with_handler(ResponseBody)
            .with_handler(ConfigMerge);
        builder
    }

    /// Add a validator, run after the standard ones.
    pub fn with_validator(&mut self, validator: impl DescriptorValidator + 'static) -> &mut Self {
        self.validators.push(Box::new(validator));
        self.validated.lock().clear();
        self
    }

    /// Add a handler at its declared order.
    pub fn with_handler(&mut self, handler: impl RequestHandler + 'static) -> &mut Self {
        self.handlers.push(Box::new(handler));
        self.handlers.sort_by_key(|h| h.order());
        self
    }

    /// Run every validator against the descriptor.
    pub fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        self.validators.iter().try_for_each(|v| v.validate(descriptor))
    }

    /// Build a request from a descriptor and the call arguments.
    ///
    /// Validation is memoised per descriptor allocation while it is alive,
    /// so pass the registry's cached `Arc` rather than a fresh copy.
    pub fn build(&self, descriptor: &Arc<Descriptor>, args: &[Argument]) -> Result<Request> {
        self.ensure_valid(descriptor)?;

        let mut request = Request::new();
        for handler in &self.handlers {
            handler.handle(descriptor, args, &mut request)?;
        }

        debug!(
            method = %request.method,
            url = %request.url,
            "Built request"
        );
        Ok(request)
    }

    fn ensure_valid(&self, descriptor: &Arc<Descriptor>) -> Result<()> {
        let id = Arc::as_ptr(descriptor) as usize;

        if let Some(seen) = self.validated.lock().get(&id)
            && std::ptr::eq(seen.as_ptr(), Arc::as_ptr(descriptor))
            && seen.strong_count() > 0
        {
            return Ok(());
        }

        self.validate(descriptor)?;
        trace!(
            class_path = ?descriptor.class_path,
            method_path = ?descriptor.method_path,
            "Descriptor validated"
        );

        // A live Weak pins the allocation, so a key can't be reused while present.
        let mut validated = self.validated.lock();
        validated.retain(|_, seen| seen.strong_count() > 0);
        validated.insert(id, Arc::downgrade(descriptor));
        Ok(())
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("validators", &self.validators.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn path_tokens(path: &str) -> impl Iterator<Item = &str> {
    PATH_TOKEN
        .captures_iter(path)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

fn argument<'a>(args: &'a [Argument], index: usize, url: &str, role: &str) -> Result<&'a Argument> {
    args.get(index).ok_or_else(|| {
        HeraldError::IndexOutOfBounds(format!(
            "The url '{url}' variable {role} is out of index."
        ))
    })
}

/// Insert or replace a key, keeping the first position.
fn upsert(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some(pair) => pair.1 = value,
        None => pairs.push((key.to_string(), value)),
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> std::result::Result<String, serde_urlencoded::ser::Error> {
    serde_urlencoded::to_string(pairs)
}

/// Collect scalar pairs from a name -> index mapper and a set of map arguments.
fn collect_pairs(
    mapper: Option<&std::collections::BTreeMap<String, usize>>,
    maps: Option<&std::collections::BTreeSet<usize>>,
    args: &[Argument],
    url: &str,
    role: &str,
    not_match: fn(String) -> HeraldError,
) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    for (name, &index) in mapper.into_iter().flatten() {
        let arg = argument(args, index, url, &format!("@{role} '{name}'"))?;
        match arg.render() {
            Ok(Some(value)) => upsert(&mut pairs, name, value),
            Ok(None) => {}
            Err(()) => return Err(not_match(format!("@{role} '{name}' can not be a binary value."))),
        }
    }

    for &index in maps.into_iter().flatten() {
        let arg = argument(args, index, url, &format!("@{role}Map"))?;
        if arg.is_null() {
            continue;
        }
        let object = arg
            .as_object()
            .ok_or_else(|| not_match(format!("@{role}Map require a object.")))?;
        for (name, value) in object {
            if let Some(value) = render_value(value) {
                upsert(&mut pairs, name, value);
            }
        }
    }

    Ok(pairs)
}

fn set_content_type(request: &mut Request, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| HeraldError::HeaderNotMatch(format!("Content-Type '{value}': {e}")))?;
    request.headers.insert(CONTENT_TYPE, value);
    Ok(())
}

// Validators

struct PathVariables;

impl DescriptorValidator for PathVariables {
    fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        let mapper = descriptor.restful_mapper.as_ref();

        for path in [&descriptor.class_path, &descriptor.method_path].into_iter().flatten() {
            for token in path_tokens(path) {
                if !mapper.is_some_and(|m| m.contains_key(token)) {
                    return Err(HeraldError::PathVariableNotMatch(format!(
                        "The url '{path}' variable @Path '{token}' is not declared."
                    )));
                }
            }
        }
        Ok(())
    }
}

struct NoPayloadOnGet;

impl DescriptorValidator for NoPayloadOnGet {
    fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        if descriptor.method() == RequestMethod::Get && descriptor.has_payload() {
            return Err(HeraldError::IllegalRequest(
                "A GET request can not carry @Body, @FormUrlEncoded or @MultiPart.".into(),
            ));
        }
        Ok(())
    }
}

struct SingleEncoding;

impl DescriptorValidator for SingleEncoding {
    fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        let body = descriptor.request_body_index.is_some();
        if body && (descriptor.is_form() || descriptor.is_multipart()) {
            return Err(HeraldError::IllegalRequest(
                "@Body can not be used with @FormUrlEncoded or @MultiPart.".into(),
            ));
        }
        if descriptor.is_form() && descriptor.is_multipart() {
            return Err(HeraldError::IllegalRequest(
                "@FormUrlEncoded can not be used with @MultiPart.".into(),
            ));
        }
        Ok(())
    }
}

struct DistinctPositions;

impl DescriptorValidator for DistinctPositions {
    fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        let mut positions = descriptor.claimed_positions();
        positions.sort_unstable();

        if let Some(pair) = positions.windows(2).find(|w| w[0] == w[1]) {
            return Err(HeraldError::IllegalRequest(format!(
                "Argument {} is claimed by more than one parameter role.",
                pair[0]
            )));
        }
        Ok(())
    }
}

struct KnownResponseType;

impl DescriptorValidator for KnownResponseType {
    fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        match &descriptor.response_type {
            Some(response_type) => response_type.parse::<ResponseType>().map(|_| ()),
            None => Ok(()),
        }
    }
}

// Handlers

/// Order 0: `class_path/method_path` with collapsed slashes, and the verb.
struct BasePath;

impl RequestHandler for BasePath {
    fn order(&self) -> i32 {
        0
    }

    fn handle(&self, descriptor: &Descriptor, _args: &[Argument], request: &mut Request) -> Result<()> {
        let class_path = descriptor.class_path.as_deref().unwrap_or_default();
        let method_path = descriptor.method_path.as_deref().unwrap_or_default();
        let joined = format!("{class_path}/{method_path}");

        request.url = DUPLICATE_SLASHES.replace_all(&joined, "${1}/").into_owned();
        request.method = descriptor.method();
        Ok(())
    }
}

/// Order 1: `:name` substitution.
struct PathSubstitution;

impl RequestHandler for PathSubstitution {
    fn order(&self) -> i32 {
        1
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        if request.url.is_empty() || !PATH_TOKEN.is_match(&request.url) {
            return Ok(());
        }

        let url = &request.url;
        let mapper = descriptor.restful_mapper.as_ref();
        let mut out = String::with_capacity(url.len());
        let mut last = 0;

        for caps in PATH_TOKEN.captures_iter(url) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let key = name.as_str();

            let index = mapper.and_then(|m| m.get(key)).copied().ok_or_else(|| {
                HeraldError::PathVariableNotMatch(format!(
                    "The url '{url}' variable @Path '{key}' is not match."
                ))
            })?;
            let arg = argument(args, index, url, &format!("@Path '{key}'"))?;

            let value = match arg.render() {
                Ok(Some(value)) => value,
                Ok(None) => {
                    return Err(HeraldError::PathVariableNotMatch(format!(
                        "The url '{url}' variable @Path '{key}' is null."
                    )));
                }
                Err(()) => {
                    return Err(HeraldError::PathVariableNotMatch(format!(
                        "The url '{url}' variable @Path '{key}' can not be a binary value."
                    )));
                }
            };

            out.push_str(&url[last..whole.start()]);
            out.push_str(&urlencoding::encode(&value));
            last = whole.end();
        }
        out.push_str(&url[last..]);

        request.url = out;
        Ok(())
    }
}

/// Order 2: query string.
struct QueryString;

impl RequestHandler for QueryString {
    fn order(&self) -> i32 {
        2
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        if request.url.is_empty() {
            return Ok(());
        }

        let pairs = collect_pairs(
            descriptor.query_mapper.as_ref(),
            descriptor.query_maps.as_ref(),
            args,
            &request.url,
            "Query",
            HeraldError::QueryParamNotMatch,
        )?;
        if pairs.is_empty() {
            return Ok(());
        }

        let query = encode_pairs(&pairs).map_err(|e| HeraldError::QueryParamNotMatch(e.to_string()))?;

        let separator = if !request.url.contains('?') {
            "?"
        } else if request.url.ends_with('?') || request.url.ends_with('&') {
            ""
        } else {
            "&"
        };
        request.url = format!("{}{}{}", request.url, separator, query);
        Ok(())
    }
}

/// Order 3: mapped headers, then static `Key: Value` headers.
struct Headers;

impl Headers {
    fn insert(headers: &mut HeaderMap, key: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| HeraldError::HeaderNotMatch(format!("Invalid header name '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HeraldError::HeaderNotMatch(format!("Invalid value for header '{key}': {e}")))?;
        headers.insert(name, value);
        Ok(())
    }
}

impl RequestHandler for Headers {
    fn order(&self) -> i32 {
        3
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        for (name, &index) in descriptor.headers_mapper.iter().flatten() {
            let arg = argument(args, index, &request.url, &format!("@Header '{name}'"))?;
            match arg.render() {
                Ok(Some(value)) => Self::insert(&mut request.headers, name, &value)?,
                Ok(None) => {}
                Err(()) => {
                    return Err(HeraldError::HeaderNotMatch(format!(
                        "@Header '{name}' can not be a binary value."
                    )));
                }
            }
        }

        for header in descriptor.headers.iter().flatten() {
            let (key, value) = header
                .split_once(':')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| {
                    HeraldError::HeaderNotMatch(format!(
                        "@Header require key-value entry, got '{header}'."
                    ))
                })?;
            Self::insert(&mut request.headers, key, value)?;
        }

        Ok(())
    }
}

/// Order 4: JSON body.
struct JsonBody;

impl RequestHandler for JsonBody {
    fn order(&self) -> i32 {
        4
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        let Some(index) = descriptor.request_body_index else {
            return Ok(());
        };

        let body = argument(args, index, &request.url, "@Body")?;
        let object = body
            .as_object()
            .ok_or_else(|| HeraldError::BodyNotMatch("@Body require a object.".into()))?;

        request.data = RequestBody::Json(Value::Object(object.clone()));
        set_content_type(request, "application/json")
    }
}

/// Order 4: form-urlencoded body.
struct FormBody;

impl RequestHandler for FormBody {
    fn order(&self) -> i32 {
        4
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        if !descriptor.is_form() {
            return Ok(());
        }

        let pairs = collect_pairs(
            descriptor.field_mapper.as_ref(),
            descriptor.field_maps.as_ref(),
            args,
            &request.url,
            "Field",
            HeraldError::BodyNotMatch,
        )?;
        let encoded = encode_pairs(&pairs).map_err(|e| HeraldError::BodyNotMatch(e.to_string()))?;

        request.data = RequestBody::Form(encoded);
        set_content_type(request, "application/x-www-form-urlencoded")
    }
}

/// Order 4: multipart body. Binary parts pass through untouched.
struct MultipartBody;

impl RequestHandler for MultipartBody {
    fn order(&self) -> i32 {
        4
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        if !descriptor.is_multipart() {
            return Ok(());
        }

        let mut form = MultipartForm::new();

        for (name, &index) in descriptor.part_mapper.iter().flatten() {
            match argument(args, index, &request.url, &format!("@Part '{name}'"))? {
                Argument::Binary(part) => {
                    form.binary(name.as_str(), part.clone());
                }
                Argument::Value(value) => {
                    if let Some(text) = render_value(value) {
                        form.text(name.as_str(), text);
                    }
                }
            }
        }

        for &index in descriptor.part_maps.iter().flatten() {
            let arg = argument(args, index, &request.url, "@PartMap")?;
            if arg.is_null() {
                continue;
            }
            let object = arg
                .as_object()
                .ok_or_else(|| HeraldError::BodyNotMatch("@PartMap require a object.".into()))?;
            for (name, value) in object {
                if let Some(text) = render_value(value) {
                    form.text(name.as_str(), text);
                }
            }
        }

        let content_type = form.content_type();
        request.data = RequestBody::Multipart(form);
        set_content_type(request, &content_type)
    }
}

/// Order 4: declared response type.
struct ResponseBody;

impl RequestHandler for ResponseBody {
    fn order(&self) -> i32 {
        4
    }

    fn handle(&self, descriptor: &Descriptor, _args: &[Argument], request: &mut Request) -> Result<()> {
        if let Some(response_type) = &descriptor.response_type {
            request.response_type = Some(response_type.parse()?);
        }
        Ok(())
    }
}

/// Last: free-form config object merged onto the request.
struct ConfigMerge;

impl ConfigMerge {
    fn apply(request: &mut Request, config: &Map<String, Value>) -> Result<()> {
        for (key, value) in config {
            match key.as_str() {
                "url" => {
                    request.url = expect_str(key, value)?.to_string();
                }
                "method" => {
                    request.method = expect_str(key, value)?.parse()?;
                }
                "baseURL" | "base_url" => {
                    request.base_url = match value {
                        Value::Null => None,
                        other => Some(expect_str(key, other)?.to_string()),
                    };
                }
                "headers" => {
                    let headers = value.as_object().ok_or_else(|| {
                        HeraldError::IllegalArgument("Config 'headers' require a object.".into())
                    })?;
                    let mut map = HeaderMap::new();
                    for (name, value) in headers {
                        if let Some(value) = render_value(value) {
                            Headers::insert(&mut map, name, &value)?;
                        }
                    }
                    request.headers = map;
                }
                "data" => {
                    request.data = match value {
                        Value::Null => RequestBody::Empty,
                        Value::String(text) => RequestBody::Text(text.clone()),
                        other => RequestBody::Json(other.clone()),
                    };
                }
                "responseType" | "response_type" => {
                    request.response_type = match value {
                        Value::Null => None,
                        other => Some(expect_str(key, other)?.parse()?),
                    };
                }
                "timeout" => {
                    request.timeout = match value {
                        Value::Null => None,
                        other => Some(Duration::from_millis(other.as_u64().ok_or_else(|| {
                            HeraldError::IllegalArgument(
                                "Config 'timeout' require a non-negative number of milliseconds.".into(),
                            )
                        })?)),
                    };
                }
                _ => {
                    request.extensions.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| HeraldError::IllegalArgument(format!("Config '{key}' require a string.")))
}

impl RequestHandler for ConfigMerge {
    fn order(&self) -> i32 {
        CONFIG_MERGE_ORDER
    }

    fn handle(&self, descriptor: &Descriptor, args: &[Argument], request: &mut Request) -> Result<()> {
        let Some(index) = descriptor.config_index else {
            return Ok(());
        };

        let arg = argument(args, index, &request.url, "@Config")?;
        if arg.is_null() {
            return Ok(());
        }
        let config = arg
            .as_object()
            .ok_or_else(|| HeraldError::IllegalArgument("Config require a object.".into()))?;

        Self::apply(request, config)
    }
}
