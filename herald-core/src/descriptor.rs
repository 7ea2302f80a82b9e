//! Endpoint descriptors.
//!
//! A [`Descriptor`] is the resolved metadata of one declared method: where the
//! request goes and which call argument feeds which part of the request.
//! Every field is optional so that class-level and method-level declarations
//! can be merged field by field.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{HeraldError, Result};

/// HTTP verb of a declared endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestMethod {
    #[default]
    Get,
    Delete,
    Head,
    Options,
    Post,
    Put,
    Patch,
}

impl RequestMethod {
    /// Lowercase verb name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Delete => "delete",
            Self::Head => "head",
            Self::Options => "options",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
        }
    }

    /// Convert to an [`http::Method`].
    pub fn to_http(&self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Delete => http::Method::DELETE,
            Self::Head => http::Method::HEAD,
            Self::Options => http::Method::OPTIONS,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
            Self::Patch => http::Method::PATCH,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "delete" => Ok(Self::Delete),
            "head" => Ok(Self::Head),
            "options" => Ok(Self::Options),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "patch" => Ok(Self::Patch),
            other => Err(HeraldError::IllegalArgument(format!(
                "Unsupported request method '{other}'."
            ))),
        }
    }
}

/// Expected decoding of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    ArrayBuffer,
    Blob,
    Document,
    Json,
    Text,
    Stream,
}

impl ResponseType {
    /// Wire name of the response type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArrayBuffer => "arraybuffer",
            Self::Blob => "blob",
            Self::Document => "document",
            Self::Json => "json",
            Self::Text => "text",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "arraybuffer" => Ok(Self::ArrayBuffer),
            "blob" => Ok(Self::Blob),
            "document" => Ok(Self::Document),
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "stream" => Ok(Self::Stream),
            other => Err(HeraldError::IllegalRequest(format!(
                "Unsupported response type '{other}'."
            ))),
        }
    }
}

/// Resolved metadata for one declared method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Path declared on the service.
    pub class_path: Option<String>,
    /// Path declared on the method.
    pub method_path: Option<String>,
    /// HTTP verb, GET when absent.
    pub request_method: Option<RequestMethod>,
    /// Path variable name -> argument position.
    pub restful_mapper: Option<BTreeMap<String, usize>>,
    /// Query key -> argument position.
    pub query_mapper: Option<BTreeMap<String, usize>>,
    /// Positions of key/value objects flattened into the query string.
    pub query_maps: Option<BTreeSet<usize>>,
    /// Header name -> argument position.
    pub headers_mapper: Option<BTreeMap<String, usize>>,
    /// Static `Key: Value` headers.
    pub headers: Option<BTreeSet<String>>,
    /// Form field -> argument position.
    pub field_mapper: Option<BTreeMap<String, usize>>,
    /// Positions of key/value objects flattened into the form.
    pub field_maps: Option<BTreeSet<usize>>,
    /// Multipart field -> argument position.
    pub part_mapper: Option<BTreeMap<String, usize>>,
    /// Positions of key/value objects flattened into the multipart payload.
    pub part_maps: Option<BTreeSet<usize>>,
    /// Position of the JSON body.
    pub request_body_index: Option<usize>,
    /// Body is form-urlencoded.
    pub is_form_commit: Option<bool>,
    /// Body is multipart.
    pub is_multi_part: Option<bool>,
    /// Declared response type, as written in the declaration.
    pub response_type: Option<String>,
    /// Position of the free-form config object.
    pub config_index: Option<usize>,
}

macro_rules! fill_absent {
    ($to:expr, $from:expr, $($field:ident),+ $(,)?) => {
        $(
            if $to.$field.is_none() {
                $to.$field = $from.$field.clone();
            }
        )+
    };
}

impl Descriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether nothing has been declared.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Copy every field of `from` that is absent here. Present fields win.
    pub fn merge_absent(&mut self, from: &Descriptor) {
        fill_absent!(
            self,
            from,
            class_path,
            method_path,
            request_method,
            restful_mapper,
            query_mapper,
            query_maps,
            headers_mapper,
            headers,
            field_mapper,
            field_maps,
            part_mapper,
            part_maps,
            request_body_index,
            is_form_commit,
            is_multi_part,
            response_type,
            config_index,
        );
    }

    /// Effective HTTP verb.
    pub fn method(&self) -> RequestMethod {
        self.request_method.unwrap_or_default()
    }

    /// Check whether the body is form-urlencoded.
    pub fn is_form(&self) -> bool {
        self.is_form_commit.unwrap_or(false)
    }

    /// Check whether the body is multipart.
    pub fn is_multipart(&self) -> bool {
        self.is_multi_part.unwrap_or(false)
    }

    /// Check whether any body, form or multipart role is declared.
    pub fn has_payload(&self) -> bool {
        self.request_body_index.is_some() || self.is_form() || self.is_multipart()
    }

    /// Every argument position claimed by a role, in declaration order of the roles.
    pub fn claimed_positions(&self) -> Vec<usize> {
        let mut positions = Vec::new();
        positions.extend(self.request_body_index);
        positions.extend(self.config_index);

        for set in [&self.query_maps, &self.field_maps, &self.part_maps]
            .into_iter()
            .flatten()
        {
            positions.extend(set.iter().copied());
        }

        for map in [
            &self.query_mapper,
            &self.field_mapper,
            &self.headers_mapper,
            &self.restful_mapper,
            &self.part_mapper,
        ]
        .into_iter()
        .flatten()
        {
            positions.extend(map.values().copied());
        }

        positions
    }
}
