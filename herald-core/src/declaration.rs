//! Declarations of services, methods and parameter roles.
//!
//! Services are declared once, when they are first bound to a client. The
//! [`service!`](crate::service) macro generates the declaration for you; the
//! types here are the explicit registration API it expands to.

use std::any::TypeId;
use std::collections::BTreeMap;

use crate::descriptor::{Descriptor, RequestMethod};
use crate::dispatch::HttpService;

/// Identity of a declared service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    /// Key of the given type.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type id of the service.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the service.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Role an argument plays in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRole {
    /// Substitutes a `:name` path token.
    Path(String),
    /// Single query parameter.
    Query(String),
    /// Object flattened into the query string.
    QueryMap,
    /// Single header.
    Header(String),
    /// Single form field.
    Field(String),
    /// Object flattened into the form.
    FieldMap,
    /// Single multipart field.
    Part(String),
    /// Object flattened into the multipart payload.
    PartMap,
    /// JSON body.
    Body,
    /// Free-form request config.
    Config,
}

impl ParamRole {
    /// Record this role for the argument at `index`.
    pub fn apply(self, descriptor: &mut Descriptor, index: usize) {
        match self {
            Self::Path(name) => {
                descriptor.restful_mapper.get_or_insert_with(BTreeMap::new).insert(name, index);
            }
            Self::Query(name) => {
                descriptor.query_mapper.get_or_insert_with(BTreeMap::new).insert(name, index);
            }
            Self::QueryMap => {
                descriptor.query_maps.get_or_insert_with(Default::default).insert(index);
            }
            Self::Header(name) => {
                descriptor.headers_mapper.get_or_insert_with(BTreeMap::new).insert(name, index);
            }
            Self::Field(name) => {
                descriptor.field_mapper.get_or_insert_with(BTreeMap::new).insert(name, index);
            }
            Self::FieldMap => {
                descriptor.field_maps.get_or_insert_with(Default::default).insert(index);
            }
            Self::Part(name) => {
                descriptor.part_mapper.get_or_insert_with(BTreeMap::new).insert(name, index);
            }
            Self::PartMap => {
                descriptor.part_maps.get_or_insert_with(Default::default).insert(index);
            }
            Self::Body => descriptor.request_body_index = Some(index),
            Self::Config => descriptor.config_index = Some(index),
        }
    }
}

/// Markers shared by class-level and method-level declarations.
pub trait Declaration {
    /// Descriptor being populated.
    fn descriptor_mut(&mut self) -> &mut Descriptor;

    /// Store a path at this declaration's level.
    fn set_path(&mut self, path: String);

    /// Declare a path with the default GET verb.
    fn http(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Get)
    }

    /// Declare a path and verb.
    fn http_with(&mut self, path: impl Into<String>, method: RequestMethod) -> &mut Self
    where
        Self: Sized,
    {
        self.set_path(path.into());
        self.descriptor_mut().request_method = Some(method);
        self
    }

    /// Declare a GET endpoint.
    fn get(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Get)
    }

    /// Declare a POST endpoint.
    fn post(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Post)
    }

    /// Declare a PUT endpoint.
    fn put(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Put)
    }

    /// Declare a DELETE endpoint.
    fn delete(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Delete)
    }

    /// Declare a HEAD endpoint.
    fn head(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Head)
    }

    /// Declare an OPTIONS endpoint.
    fn options(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Options)
    }

    /// Declare a PATCH endpoint.
    fn patch(&mut self, path: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.http_with(path, RequestMethod::Patch)
    }

    /// Add static `Key: Value` headers.
    fn headers<I, S>(&mut self, headers: I) -> &mut Self
    where
        Self: Sized,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.descriptor_mut().headers.get_or_insert_with(Default::default);
        for header in headers {
            set.insert(header.into().trim().to_string());
        }
        self
    }

    /// Send the body form-urlencoded.
    fn form_url_encoded(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.descriptor_mut().is_form_commit = Some(true);
        self
    }

    /// Send the body as multipart.
    fn multipart(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.descriptor_mut().is_multi_part = Some(true);
        self
    }

    /// Declare the expected response type (`json`, `text`, `arraybuffer`, ...).
    fn response_body(&mut self, response_type: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.descriptor_mut().response_type = Some(response_type.into());
        self
    }
}

/// Class-level declaration, shared by every method of the service.
#[derive(Debug, Clone, Default)]
pub struct ClassDeclaration {
    descriptor: Descriptor,
}

impl ClassDeclaration {
    /// Get the declared descriptor.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl Declaration for ClassDeclaration {
    fn descriptor_mut(&mut self) -> &mut Descriptor {
        &mut self.descriptor
    }

    fn set_path(&mut self, path: String) {
        self.descriptor.class_path = Some(path);
    }
}

/// Method-level declaration.
#[derive(Debug, Clone, Default)]
pub struct MethodDeclaration {
    descriptor: Descriptor,
    arity: usize,
}

impl MethodDeclaration {
    /// Declare the role of the next parameter.
    pub fn param(&mut self, role: ParamRole) -> &mut Self {
        let index = self.arity;
        self.param_at(index, role)
    }

    /// Declare the role of the parameter at `index`.
    pub fn param_at(&mut self, index: usize, role: ParamRole) -> &mut Self {
        role.apply(&mut self.descriptor, index);
        self.arity = self.arity.max(index + 1);
        self
    }

    /// Get the declared descriptor.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl Declaration for MethodDeclaration {
    fn descriptor_mut(&mut self) -> &mut Descriptor {
        &mut self.descriptor
    }

    fn set_path(&mut self, path: String) {
        self.descriptor.method_path = Some(path);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentService {
    pub(crate) key: ServiceKey,
    pub(crate) declare: fn(&mut ServiceDeclaration),
}

/// Everything declared for one service type.
#[derive(Debug, Clone)]
pub struct ServiceDeclaration {
    key: ServiceKey,
    class: ClassDeclaration,
    methods: BTreeMap<String, MethodDeclaration>,
    parent: Option<ParentService>,
}

impl ServiceDeclaration {
    /// Start an empty declaration for `T`.
    pub fn new<T: ?Sized + 'static>() -> Self {
        Self::for_key(ServiceKey::of::<T>())
    }

    /// Start an empty declaration for the given key.
    pub fn for_key(key: ServiceKey) -> Self {
        Self {
            key,
            class: ClassDeclaration::default(),
            methods: BTreeMap::new(),
            parent: None,
        }
    }

    /// Collect the declaration of a service.
    pub fn of<S: HttpService>() -> Self {
        let mut declaration = Self::new::<S>();
        S::declare(&mut declaration);
        declaration
    }

    /// Get the service key.
    pub fn key(&self) -> ServiceKey {
        self.key
    }

    /// Class-level declaration.
    pub fn class_mut(&mut self) -> &mut ClassDeclaration {
        &mut self.class
    }

    /// Class-level declaration.
    pub fn class(&self) -> &ClassDeclaration {
        &self.class
    }

    /// Declaration of the named method, created on first use.
    pub fn method(&mut self, name: &str) -> &mut MethodDeclaration {
        self.methods.entry(name.to_string()).or_default()
    }

    /// Inherit class-level and method-level declarations from `P`.
    pub fn extends<P: HttpService>(&mut self) -> &mut Self {
        self.parent = Some(ParentService {
            key: ServiceKey::of::<P>(),
            declare: P::declare,
        });
        self
    }

    pub(crate) fn parent(&self) -> Option<ParentService> {
        self.parent
    }

    /// Split into the class-level descriptor and the non-empty method descriptors.
    pub(crate) fn into_parts(self) -> (Descriptor, Vec<(String, Descriptor)>) {
        let methods = self
            .methods
            .into_iter()
            .filter(|(_, method)| !method.descriptor.is_empty())
            .map(|(name, method)| (name, method.descriptor))
            .collect();
        (self.class.descriptor, methods)
    }
}

/// Parameter role markers used by [`service!`](crate::service).
pub mod markers {
    use super::ParamRole;

    /// `:name` path variable.
    pub fn path(name: &str) -> ParamRole {
        ParamRole::Path(name.to_string())
    }

    /// Query parameter.
    pub fn query(name: &str) -> ParamRole {
        ParamRole::Query(name.to_string())
    }

    /// Object flattened into the query string.
    pub fn query_map() -> ParamRole {
        ParamRole::QueryMap
    }

    /// Header.
    pub fn header(name: &str) -> ParamRole {
        ParamRole::Header(name.to_string())
    }

    /// Form field.
    pub fn field(name: &str) -> ParamRole {
        ParamRole::Field(name.to_string())
    }

    /// Object flattened into the form.
    pub fn field_map() -> ParamRole {
        ParamRole::FieldMap
    }

    /// Multipart field.
    pub fn part(name: &str) -> ParamRole {
        ParamRole::Part(name.to_string())
    }

    /// Object flattened into the multipart payload.
    pub fn part_map() -> ParamRole {
        ParamRole::PartMap
    }

    /// JSON body.
    pub fn body() -> ParamRole {
        ParamRole::Body
    }

    /// Free-form request config.
    pub fn config() -> ParamRole {
        ParamRole::Config
    }
}

/// Declare an HTTP service.
///
/// The struct-level attributes are class-level markers, the method-level
/// attributes are method markers of [`Declaration`], and every parameter
/// carries one role from [`markers`]. Each declared method returns a
/// cancellable [`Call`](crate::Call).
///
/// ```rust
/// use herald_core::service;
///
/// service! {
///     #[http("/test")]
///     #[headers(["Cache-Control: no-store"])]
///     pub struct TestingClient {
///         #[get("/a/:p1/:p2")]
///         pub fn fetch(#[path("p1")] p1: &str, #[path("p2")] p2: u32);
///
///         #[post("/items")]
///         pub fn create(#[body] item: serde_json::Value, #[header("X-Trace")] trace: String);
///     }
/// }
/// ```
///
/// A service may extend another one with `pub struct Child: Parent { ... }`.
#[macro_export]
macro_rules! service {
    (
        $( #[$cmarker:ident $( ( $($cargs:tt)* ) )? ] )*
        $vis:vis struct $name:ident $( : $parent:ty )? {
            $(
                $( #[$mmarker:ident $( ( $($margs:tt)* ) )? ] )*
                $mvis:vis fn $method:ident (
                    $( #[$role:ident $( ( $($rargs:tt)* ) )? ] $arg:ident : $ty:ty ),* $(,)?
                );
            )*
        }
    ) => {
        $vis struct $name {
            proxy: $crate::ServiceProxy,
        }

        impl $crate::HttpService for $name {
            fn declare(service: &mut $crate::ServiceDeclaration) {
                $( service.extends::<$parent>(); )?

                #[allow(unused_variables)]
                let class = service.class_mut();
                $( $crate::Declaration::$cmarker(&mut *class $(, $($cargs)*)?); )*

                $(
                    #[allow(unused_variables)]
                    let method = service.method(stringify!($method));
                    $( $crate::Declaration::$mmarker(&mut *method $(, $($margs)*)?); )*
                    $( method.param($crate::markers::$role( $( $($rargs)* )? )); )*
                )*
            }

            fn from_proxy(proxy: $crate::ServiceProxy) -> Self {
                Self { proxy }
            }

            fn proxy(&self) -> &$crate::ServiceProxy {
                &self.proxy
            }
        }

        impl $name {
            $(
                $mvis fn $method(&self, $( $arg: $ty ),*) -> $crate::Call {
                    self.proxy.invoke::<Self>(
                        stringify!($method),
                        vec![$( $crate::Argument::from($arg) ),*],
                    )
                }
            )*
        }
    };
}
