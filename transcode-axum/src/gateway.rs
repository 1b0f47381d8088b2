//! The transcoding gateway.
//!
//! [`Gateway::builder`] collects handlers and settings. [`GatewayBuilder::build`]
//! reads the `google.api.http` rules of every service that has a handler,
//! compiles them into a route table and indexes the schema. The built
//! gateway turns into an [`axum::Router`] that serves every route.
//!
//! # Example
//!
//! ```rust,no_run
//! use prost_reflect::DescriptorPool;
//! use transcode_axum::{BoxError, Gateway};
//!
//! # fn run(pool: DescriptorPool) -> Result<(), transcode_axum::BuildError> {
//! let router = Gateway::builder(pool)
//!     .unary("greet.v1.Greeter.SayHello", |_ctx, request| async move {
//!         Ok::<_, BoxError>(request)
//!     })
//!     .build()?
//!     .into_router();
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use axum::routing::any;
use http_body_util::StreamBody;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use tokio::sync::mpsc;
use transcode_axum_core::{Code, JSON_CONTENT_TYPE, Metadata, Status};

use crate::binder::bind;
use crate::context::error::declared;
use crate::context::{CallContext, CallState, classify_error};
use crate::descriptor::DescriptorInfo;
use crate::error::{BoxError, BuildError};
use crate::handler::{
    BoxedStreamingCall, MethodHandler, UnaryFuture, box_streaming, box_streaming_typed, box_unary,
    box_unary_typed,
};
use crate::http_rule::HttpRule;
use crate::limits::MessageLimits;
use crate::marshal::{
    JsonSettings, encode_response, error_response, extend_headers, internal_error_response,
    success_response,
};
use crate::registry::SchemaRegistry;
use crate::route::{CompiledRoute, RouteValues};
use crate::stream::{ResponseStream, STREAM_BUFFER, ServerStreamWriter, StreamEvent};
use crate::template::HttpRulePattern;

/// One compiled HTTP binding of a method.
#[derive(Debug)]
struct Route {
    http_method: Method,
    route: CompiledRoute,
    info: Arc<DescriptorInfo>,
    method: MethodDescriptor,
    handler: Option<MethodHandler>,
}

#[derive(Debug)]
struct GatewayInner {
    routes: Vec<Route>,
    registry: Arc<SchemaRegistry>,
    json_settings: JsonSettings,
    limits: MessageLimits,
    detailed_errors: bool,
    server_timeout: Option<Duration>,
}

/// A built gateway, ready to serve.
#[derive(Clone, Debug)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

/// Builder for [`Gateway`].
///
/// Registration never fails; mistakes are reported by
/// [`build`](GatewayBuilder::build).
pub struct GatewayBuilder {
    pool: DescriptorPool,
    handlers: HashMap<String, MethodHandler>,
    rules: HashMap<String, HttpRule>,
    json_settings: JsonSettings,
    limits: MessageLimits,
    detailed_errors: bool,
    server_timeout: Option<Duration>,
    expose_unannotated: bool,
    registry_files: Vec<String>,
}

impl Gateway {
    /// Start building a gateway over the services in `pool`.
    pub fn builder(pool: DescriptorPool) -> GatewayBuilder {
        GatewayBuilder {
            pool,
            handlers: HashMap::new(),
            rules: HashMap::new(),
            json_settings: JsonSettings::default(),
            limits: MessageLimits::default(),
            detailed_errors: false,
            server_timeout: None,
            expose_unannotated: false,
            registry_files: Vec::new(),
        }
    }

    /// The schema registry used for error details.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    /// The route table in match order: HTTP method, route path and the full
    /// name of the gRPC method it calls.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str, &str)> {
        self.inner.routes.iter().map(|route| {
            (
                &route.http_method,
                route.route.path(),
                route.method.full_name(),
            )
        })
    }

    /// Turn the gateway into a router serving every route.
    ///
    /// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` to
    /// make the peer address available to handlers.
    pub fn into_router(self) -> Router {
        Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(self.inner)
    }
}

impl GatewayBuilder {
    /// Register a unary handler working on dynamic messages.
    ///
    /// `method` is the full method name, `package.Service.Method` or
    /// `/package.Service/Method`.
    pub fn unary<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(CallContext, DynamicMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DynamicMessage, BoxError>> + Send + 'static,
    {
        self.handlers
            .insert(normalize_method_name(method), MethodHandler::Unary(box_unary(handler)));
        self
    }

    /// Register a unary handler working on generated prost types.
    pub fn unary_typed<Req, Resp, F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + 'static,
        Resp: prost::Message + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, BoxError>> + Send + 'static,
    {
        self.handlers.insert(
            normalize_method_name(method),
            MethodHandler::Unary(box_unary_typed(handler)),
        );
        self
    }

    /// Register a server streaming handler working on dynamic messages.
    pub fn server_streaming<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(CallContext, DynamicMessage, ServerStreamWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.handlers.insert(
            normalize_method_name(method),
            MethodHandler::ServerStreaming(box_streaming(handler)),
        );
        self
    }

    /// Register a server streaming handler taking a generated request type.
    ///
    /// Responses are written with [`ServerStreamWriter::write_typed`].
    pub fn server_streaming_typed<Req, F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + 'static,
        F: Fn(CallContext, Req, ServerStreamWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.handlers.insert(
            normalize_method_name(method),
            MethodHandler::ServerStreaming(box_streaming_typed(handler)),
        );
        self
    }

    /// Use `rule` for `method` instead of the rule in its options.
    pub fn http_rule(mut self, method: &str, rule: HttpRule) -> Self {
        self.rules.insert(normalize_method_name(method), rule);
        self
    }

    /// Set JSON formatting options.
    pub fn json_settings(mut self, settings: JsonSettings) -> Self {
        self.json_settings = settings;
        self
    }

    /// Include the error chain of unexpected handler errors in responses.
    ///
    /// Off by default; error messages may leak internals.
    pub fn enable_detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = enabled;
        self
    }

    /// Set message size limits.
    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bound every call by `timeout`. A shorter `grpc-timeout` from the
    /// client still wins.
    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    /// Serve methods without an HTTP rule at `POST /package.Service/Method`
    /// with the whole request as the body.
    pub fn expose_unannotated_methods(mut self, enabled: bool) -> Self {
        self.expose_unannotated = enabled;
        self
    }

    /// Also index the messages of `file` (and its imports) for rendering
    /// error details.
    pub fn type_registry_file(mut self, file: impl Into<String>) -> Self {
        self.registry_files.push(file.into());
        self
    }

    /// Validate the handlers and compile the route table.
    pub fn build(mut self) -> Result<Gateway, BuildError> {
        self.check_handlers()?;

        let mut registry = SchemaRegistry::new(self.pool.clone());
        for name in &self.registry_files {
            let file = self
                .pool
                .get_file_by_name(name)
                .ok_or_else(|| BuildError::FileNotFound(name.clone()))?;
            registry.add_file(file);
        }

        let mut routes: Vec<Route> = Vec::new();
        for service in self.pool.services() {
            let served = service
                .methods()
                .any(|method| self.handlers.contains_key(method.full_name()));
            if !served {
                continue;
            }
            registry.add_file(service.parent_file());

            for method in service.methods() {
                let handler = self.handlers.remove(method.full_name());
                self.add_routes(&mut routes, method, handler)?;
            }
        }

        // Stable: routes with equal precedence keep declaration order.
        routes.sort_by(|a, b| a.route.precedence().cmp(&b.route.precedence()));
        tracing::debug!(
            routes = routes.len(),
            messages = registry.message_count(),
            "Built transcoding gateway"
        );

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                routes,
                registry: Arc::new(registry),
                json_settings: self.json_settings,
                limits: self.limits,
                detailed_errors: self.detailed_errors,
                server_timeout: self.server_timeout,
            }),
        })
    }

    fn check_handlers(&self) -> Result<(), BuildError> {
        for name in self.rules.keys() {
            find_method(&self.pool, name)?;
        }

        for (name, handler) in &self.handlers {
            let method = find_method(&self.pool, name)?;
            if method.is_client_streaming() {
                return Err(BuildError::ClientStreaming {
                    method: name.clone(),
                });
            }
            let expected = if method.is_server_streaming() {
                "server streaming"
            } else {
                "unary"
            };
            if handler.kind() != expected {
                return Err(BuildError::HandlerKindMismatch {
                    method: name.clone(),
                    expected,
                });
            }
        }
        Ok(())
    }

    fn add_routes(
        &self,
        routes: &mut Vec<Route>,
        method: MethodDescriptor,
        handler: Option<MethodHandler>,
    ) -> Result<(), BuildError> {
        let name = method.full_name().to_string();

        let rule = match self.rules.get(&name) {
            Some(rule) => Some(rule.clone()),
            None => HttpRule::from_method(&method),
        };
        let rule = match rule {
            Some(rule) => rule,
            None if self.expose_unannotated => {
                HttpRule::post(format!("/{}/{}", method.parent_service().full_name(), method.name()))
                    .with_body("*")
            }
            None => {
                tracing::debug!(method = %name, "Skipping method without an HTTP rule");
                return Ok(());
            }
        };

        if method.is_client_streaming() {
            tracing::debug!(method = %name, "Skipping client streaming method");
            return Ok(());
        }

        for binding in rule.bindings(&name)? {
            let pattern = HttpRulePattern::parse(&binding.template).map_err(|source| {
                BuildError::Template {
                    method: name.clone(),
                    source,
                }
            })?;
            let variables: Vec<String> = pattern
                .variables
                .iter()
                .map(|variable| variable.field_path.clone())
                .collect();
            let info = DescriptorInfo::new(
                &name,
                method.input(),
                &method.output(),
                binding.body.as_deref(),
                binding.response_body.as_deref(),
                &variables,
            )?;
            let route = CompiledRoute::compile(&pattern);

            if let Some(existing) = routes.iter().find(|existing| {
                existing.http_method == binding.method
                    && existing.route.path() == route.path()
                    && existing.route.verb() == route.verb()
            }) {
                return Err(BuildError::DuplicateRoute {
                    http_method: binding.method,
                    path: route.path().to_string(),
                    first: existing.method.full_name().to_string(),
                    second: name,
                });
            }

            tracing::debug!(
                http_method = %binding.method,
                path = route.path(),
                method = %name,
                "Registered route"
            );

            routes.push(Route {
                http_method: binding.method,
                route,
                info: Arc::new(info),
                method: method.clone(),
                handler: handler.clone(),
            });
        }
        Ok(())
    }
}

fn normalize_method_name(name: &str) -> String {
    name.trim_start_matches('/').replace('/', ".")
}

fn find_method(pool: &DescriptorPool, name: &str) -> Result<MethodDescriptor, BuildError> {
    let (service, method) = name
        .rsplit_once('.')
        .ok_or_else(|| BuildError::MethodNotFound(name.to_string()))?;
    let service = pool
        .get_service_by_name(service)
        .ok_or_else(|| BuildError::ServiceNotFound(service.to_string()))?;
    service
        .methods()
        .find(|candidate| candidate.name() == method)
        .ok_or_else(|| BuildError::MethodNotFound(name.to_string()))
}

// ============================================================================
// Dispatch
// ============================================================================

async fn dispatch(State(gateway): State<Arc<GatewayInner>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    let mut allowed: Vec<&Method> = Vec::new();
    let mut selected = None;
    for route in &gateway.routes {
        let Some(values) = route.route.match_path(&path) else {
            continue;
        };
        if route.http_method == request.method() {
            selected = Some((route, values));
            break;
        }
        if !allowed.contains(&&route.http_method) {
            allowed.push(&route.http_method);
        }
    }

    let Some((route, values)) = selected else {
        if allowed.is_empty() {
            tracing::debug!(path, "No route matched");
            return gateway.error(&Status::not_found("Not Found"));
        }
        let allow = allowed
            .iter()
            .map(|method| method.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut response = gateway.error(&Status::unimplemented("Method Not Allowed"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        if let Ok(allow) = HeaderValue::from_str(&allow) {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        return response;
    };

    let Some(handler) = &route.handler else {
        return gateway.error(&Status::unimplemented(format!(
            "Method '{}' is not implemented.",
            route.method.full_name()
        )));
    };

    gateway.call(route, handler, values, request).await
}

impl GatewayInner {
    fn error(&self, status: &Status) -> Response {
        error_response(
            status,
            &self.registry,
            &self.json_settings,
            &Metadata::new(),
            &Metadata::new(),
        )
    }

    async fn call(
        &self,
        route: &Route,
        handler: &MethodHandler,
        values: RouteValues,
        request: Request,
    ) -> Response {
        let (parts, body) = request.into_parts();

        let ctx = match CallContext::from_parts(route.method.clone(), &parts, self.server_timeout) {
            Ok(ctx) => ctx,
            Err(status) => return self.error(&status),
        };

        let message = match bind(
            &route.info,
            &parts,
            body,
            &values,
            ctx.encoding(),
            &self.limits,
        )
        .await
        {
            Ok(message) => message,
            Err(status) => {
                tracing::debug!(
                    method = ctx.method(),
                    code = %status.code(),
                    error = status.message(),
                    "Failed to bind request"
                );
                return self.error(&status);
            }
        };

        match handler {
            MethodHandler::Unary(call) => {
                let call = call(ctx.clone(), message);
                self.unary(ctx, &route.info, call).await
            }
            MethodHandler::ServerStreaming(call) => self.server_streaming(ctx, call, message).await,
        }
    }

    async fn unary(&self, ctx: CallContext, info: &DescriptorInfo, call: UnaryFuture) -> Response {
        // Dropping the dispatch future (client gone) cancels the call.
        let _guard = ctx.cancellation_token().clone().drop_guard();
        ctx.set_state(CallState::Active);

        let result = run_with_deadline(&ctx, self.detailed_errors, call).await;
        let state = ctx.take_response_state();
        let outcome = result.and_then(|output| match state.status {
            Some(status) if status.code() != Code::Ok => Err(declared(status)),
            _ => encode_response(&output, info.response_body(), &self.json_settings, &self.limits),
        });

        let response = match outcome {
            Ok(encoded) => success_response(encoded, &state.headers, &state.trailers),
            Err(status) => error_response(
                &status,
                &self.registry,
                &self.json_settings,
                &state.headers,
                &state.trailers,
            ),
        };
        ctx.set_state(CallState::Completed);
        response
    }

    /// Run a streaming handler on its own task and respond once the first
    /// message (or the outcome) is known.
    ///
    /// An error before the first message becomes a plain error response.
    /// Afterwards the status line is sent and a failure is reported as a
    /// final error line.
    async fn server_streaming(
        &self,
        ctx: CallContext,
        call: &BoxedStreamingCall,
        message: DynamicMessage,
    ) -> Response {
        let guard = ctx.cancellation_token().clone().drop_guard();
        let (sender, mut receiver) = mpsc::channel(STREAM_BUFFER);
        let writer = ServerStreamWriter::new(
            sender.clone(),
            ctx.output_descriptor(),
            self.json_settings,
            self.limits,
            ctx.cancellation_token().clone(),
        );

        ctx.set_state(CallState::Active);
        let call = call(ctx.clone(), message, writer);
        let detailed = self.detailed_errors;
        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            let result = run_with_deadline(&task_ctx, detailed, call).await;
            let result = result.and_then(|()| match task_ctx.status() {
                Some(status) if status.code() != Code::Ok => Err(declared(status)),
                _ => Ok(()),
            });
            let trailers = task_ctx.take_trailers();
            let event = match result {
                Ok(()) => StreamEvent::End(trailers),
                Err(status) => StreamEvent::Error(status, trailers),
            };
            // Fails only when the response body is gone.
            if sender.send(event).await.is_err() {
                tracing::debug!(method = task_ctx.method(), "Stream closed before the call ended");
            }
            task_ctx.set_state(CallState::Completed);
        });

        let first = match receiver.recv().await {
            Some(StreamEvent::Error(status, trailers)) => {
                return error_response(
                    &status,
                    &self.registry,
                    &self.json_settings,
                    &ctx.take_response_headers(),
                    &trailers,
                );
            }
            Some(first) => first,
            None => {
                tracing::error!(method = ctx.method(), "Stream ended without an outcome");
                return internal_error_response();
            }
        };

        let stream = ResponseStream::new(
            first,
            receiver,
            self.registry.clone(),
            self.json_settings,
            guard,
        );
        let mut response = Response::new(Body::new(StreamBody::new(stream)));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        extend_headers(response.headers_mut(), &ctx.take_response_headers());
        response
    }
}

/// Await a handler within the call's deadline and classify its failure.
///
/// When the deadline passes the handler future is dropped and the call is
/// cancelled.
async fn run_with_deadline<T>(
    ctx: &CallContext,
    detailed: bool,
    call: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, Status> {
    let result = match ctx.deadline() {
        Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancellation_token().cancel();
                tracing::debug!(method = ctx.method(), "Call exceeded its deadline");
                return Err(Status::deadline_exceeded("Deadline Exceeded"));
            }
        },
        None => call.await,
    };
    result.map_err(|err| classify_error(err, ctx.method(), detailed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, GREETER_FILE};
    use axum::http::HeaderMap;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use prost_reflect::Value;
    use tower::ServiceExt;

    const SAY_HELLO: &str = "transcoding.v1.Greeter.SayHello";

    struct TestResponse {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        trailers: Option<HeaderMap>,
    }

    impl TestResponse {
        fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        fn lines(&self) -> Vec<serde_json::Value> {
            self.body
                .split(|byte| *byte == b'\n')
                .filter(|line| !line.is_empty())
                .map(|line| serde_json::from_slice(line).unwrap())
                .collect()
        }
    }

    fn builder() -> GatewayBuilder {
        Gateway::builder(test_support::descriptor_pool())
    }

    fn reply(message: impl Into<String>) -> DynamicMessage {
        let mut reply = DynamicMessage::new(test_support::message("transcoding.v1.HelloReply"));
        reply.set_field_by_name("message", Value::String(message.into()));
        reply
    }

    fn string_field(message: &DynamicMessage, name: &str) -> String {
        message
            .get_field_by_name(name)
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    async fn hello(_ctx: CallContext, request: DynamicMessage) -> Result<DynamicMessage, BoxError> {
        Ok(reply(format!("Hello {}", string_field(&request, "name"))))
    }

    async fn send(router: Router, request: axum::http::Request<Body>) -> TestResponse {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let collected = response.into_body().collect().await.unwrap();
        let trailers = collected.trailers().cloned();
        TestResponse {
            status,
            headers,
            body: collected.to_bytes(),
            trailers,
        }
    }

    async fn get(router: Router, uri: &str) -> TestResponse {
        let request = axum::http::Request::get(uri).body(Body::empty()).unwrap();
        send(router, request).await
    }

    async fn post(router: Router, uri: &str, body: &'static str) -> TestResponse {
        let request = axum::http::Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        send(router, request).await
    }

    fn router(builder: GatewayBuilder) -> Router {
        builder.build().unwrap().into_router()
    }

    #[tokio::test]
    async fn test_get_binds_route_and_query() {
        let router = router(builder().unary(SAY_HELLO, |_ctx, request: DynamicMessage| async move {
            let sub = request.get_field_by_name("sub").unwrap();
            let subfield = sub
                .as_message()
                .and_then(|sub| sub.get_field_by_name("subfield"))
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();
            Ok::<_, BoxError>(reply(format!("{} {}", string_field(&request, "name"), subfield)))
        }));

        let response = get(router, "/v1/greeter/ada?sub.subfield=lovelace").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(response.json()["message"], "ada lovelace");
        assert!(response.trailers.is_none());
    }

    #[tokio::test]
    async fn test_additional_binding() {
        let router = router(builder().unary(SAY_HELLO, hello));
        let response = get(router, "/v1/hello/bob").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["message"], "Hello bob");
    }

    #[tokio::test]
    async fn test_post_whole_body() {
        let router = router(builder().unary("/transcoding.v1.Greeter/SayHelloPost", hello));
        let response = post(router, "/v1/greeter", r#"{"name":"carol"}"#).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["message"], "Hello carol");
    }

    #[tokio::test]
    async fn test_multi_segment_capture() {
        let router = router(builder().unary("transcoding.v1.Greeter.GetShelfBook", hello));
        let response = get(router, "/v1/shelves/1/books/2").await;
        assert_eq!(response.json()["message"], "Hello shelves/1/books/2");
    }

    #[tokio::test]
    async fn test_verb_route_takes_precedence() {
        let router = router(
            builder()
                .unary(SAY_HELLO, hello)
                .unary("transcoding.v1.Greeter.CancelHello", |_ctx, request: DynamicMessage| async move {
                    Ok::<_, BoxError>(reply(format!("cancel {}", string_field(&request, "name"))))
                }),
        );

        let response = post(router.clone(), "/v1/greeter/dave:cancel", "{}").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["message"], "cancel dave");

        // Without a matching verb route, the name keeps the suffix.
        let response = get(router, "/v1/greeter/dave:cancel").await;
        assert_eq!(response.json()["message"], "Hello dave:cancel");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let router = router(builder().unary(SAY_HELLO, hello));
        let response = get(router, "/v2/unknown").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.json()["code"], 5);
    }

    #[tokio::test]
    async fn test_wrong_http_method_lists_allowed_methods() {
        let router = router(builder().unary(SAY_HELLO, hello));

        let response = send(
            router.clone(),
            axum::http::Request::delete("/v1/greeter/ada").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers[header::ALLOW], "GET");
        assert_eq!(response.json()["code"], 12);

        let response = get(router, "/v1/greeter").await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers[header::ALLOW], "POST");
    }

    #[tokio::test]
    async fn test_method_without_handler_is_unimplemented() {
        let router = router(builder().unary(SAY_HELLO, hello));
        let response = get(router, "/v1/values/ada").await;
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
        let json = response.json();
        assert_eq!(json["code"], 12);
        assert_eq!(
            json["message"],
            "Method 'transcoding.v1.Greeter.SayHelloValues' is not implemented."
        );
    }

    #[tokio::test]
    async fn test_bind_failure_is_bad_request() {
        let router = router(builder().unary("transcoding.v1.Greeter.SayHelloPost", hello));
        let response = post(router, "/v1/greeter", "{not json").await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        let json = response.json();
        assert_eq!(json["code"], 3);
        assert_eq!(json["message"], "Request JSON payload is not correctly formatted.");
    }

    #[tokio::test]
    async fn test_handler_status_error() {
        let router = router(builder().unary(SAY_HELLO, |_ctx, _request| async move {
            Err::<DynamicMessage, BoxError>(Box::new(Status::not_found("no such greeter")))
        }));
        let response = get(router, "/v1/greeter/ada").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let json = response.json();
        assert_eq!(json["code"], 5);
        assert_eq!(json["message"], "no such greeter");
        assert_eq!(json["details"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unexpected_error_hides_details() {
        let failing = |_ctx: CallContext, _request: DynamicMessage| async move {
            Err::<DynamicMessage, BoxError>(Box::new(std::io::Error::other("disk on fire")))
        };

        let response = get(router(builder().unary(SAY_HELLO, failing)), "/v1/greeter/ada").await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = response.json();
        assert_eq!(json["code"], 2);
        assert_eq!(json["message"], "Exception was thrown by handler.");

        let detailed = builder().unary(SAY_HELLO, failing).enable_detailed_errors(true);
        let response = get(router(detailed), "/v1/greeter/ada").await;
        let message = response.json()["message"].as_str().unwrap().to_string();
        assert!(message.starts_with("Exception was thrown by handler."));
        assert!(message.contains("std::io::Error: disk on fire"));
    }

    #[tokio::test]
    async fn test_set_status_replaces_response() {
        let router = router(builder().unary(SAY_HELLO, |ctx: CallContext, request| async move {
            ctx.set_status(Status::permission_denied("not for you"));
            hello(ctx, request).await
        }));
        let response = get(router, "/v1/greeter/ada").await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(response.json()["message"], "not for you");
    }

    #[tokio::test]
    async fn test_response_headers_and_trailers() {
        let router = router(builder().unary(SAY_HELLO, |ctx: CallContext, request| async move {
            ctx.append_response_header("x-greeting", "hi");
            ctx.append_trailer("x-checksum", "abc");
            assert_eq!(ctx.state(), CallState::Active);
            hello(ctx, request).await
        }));
        let response = get(router, "/v1/greeter/ada").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["x-greeting"], "hi");
        assert_eq!(response.trailers.as_ref().unwrap()["x-checksum"], "abc");
        assert_eq!(response.json()["message"], "Hello ada");
    }

    #[tokio::test]
    async fn test_context_sees_request_metadata() {
        let router = router(builder().unary(SAY_HELLO, |ctx: CallContext, _request| async move {
            Ok::<_, BoxError>(reply(format!(
                "{} {} {}",
                ctx.method(),
                ctx.host(),
                ctx.request_metadata().get_ascii("x-user").unwrap_or("-")
            )))
        }));
        let request = axum::http::Request::get("/v1/greeter/ada")
            .header(header::HOST, "api.example.com")
            .header("x-user", "alice")
            .body(Body::empty())
            .unwrap();
        let response = send(router, request).await;
        assert_eq!(
            response.json()["message"],
            "/transcoding.v1.Greeter/SayHello api.example.com alice"
        );
    }

    #[tokio::test]
    async fn test_response_body_field() {
        let router = router(builder().unary("transcoding.v1.Greeter.SayHelloMessage", hello));
        let response = get(router, "/v1/reply/ada").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json(), serde_json::json!("Hello ada"));
    }

    #[tokio::test]
    async fn test_http_body_response_is_raw() {
        let router = router(builder().unary(
            "transcoding.v1.Greeter.Download",
            |_ctx, request: DynamicMessage| async move {
                let mut body = DynamicMessage::new(test_support::message("google.api.HttpBody"));
                body.set_field_by_name("content_type", Value::String("text/plain".into()));
                body.set_field_by_name(
                    "data",
                    Value::Bytes(Bytes::from(format!("file {}", string_field(&request, "name")))),
                );
                Ok::<_, BoxError>(body)
            },
        ));
        let response = get(router, "/v1/download/report").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(&response.body[..], b"file report");
    }

    #[tokio::test]
    async fn test_typed_unary_handler() {
        #[derive(Clone, PartialEq, prost::Message)]
        struct HelloRequest {
            #[prost(string, tag = "1")]
            name: String,
        }

        #[derive(Clone, PartialEq, prost::Message)]
        struct HelloReply {
            #[prost(string, tag = "1")]
            message: String,
        }

        let router = router(builder().unary_typed(SAY_HELLO, |_ctx, request: HelloRequest| async move {
            Ok::<_, BoxError>(HelloReply {
                message: format!("typed {}", request.name),
            })
        }));
        let response = get(router, "/v1/greeter/ada").await;
        assert_eq!(response.json()["message"], "typed ada");
    }

    const STREAM_HELLOS: &str = "transcoding.v1.Greeter.StreamHellos";

    #[tokio::test]
    async fn test_server_streaming_writes_lines() {
        let router = router(builder().server_streaming(
            STREAM_HELLOS,
            |ctx: CallContext, request: DynamicMessage, writer: ServerStreamWriter| async move {
                ctx.append_response_header("x-stream", "yes");
                let name = string_field(&request, "name");
                for i in 1..=3 {
                    writer.write(&reply(format!("{name} {i}"))).await?;
                }
                Ok::<_, BoxError>(())
            },
        ));
        let response = get(router, "/v1/stream/ada").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(response.headers["x-stream"], "yes");

        let lines = response.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["message"], "ada 1");
        assert_eq!(lines[2]["message"], "ada 3");
    }

    #[tokio::test]
    async fn test_server_streaming_error_after_writes() {
        let router = router(builder().server_streaming(
            STREAM_HELLOS,
            |ctx: CallContext, _request, writer: ServerStreamWriter| async move {
                writer.write(&reply("first")).await?;
                ctx.append_trailer("x-progress", "1");
                Err::<(), BoxError>(Box::new(Status::aborted("stopped")))
            },
        ));
        let response = get(router, "/v1/stream/ada").await;
        assert_eq!(response.status, StatusCode::OK);

        let lines = response.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "first");
        assert_eq!(lines[1]["code"], 10);
        assert_eq!(lines[1]["message"], "stopped");
        assert_eq!(response.trailers.as_ref().unwrap()["x-progress"], "1");
    }

    #[tokio::test]
    async fn test_server_streaming_error_before_first_write() {
        let router = router(builder().server_streaming(
            STREAM_HELLOS,
            |_ctx, _request, _writer| async move {
                Err::<(), BoxError>(Box::new(Status::aborted("nothing to send")))
            },
        ));
        let response = get(router, "/v1/stream/ada").await;
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert_eq!(response.json()["code"], 10);
    }

    #[tokio::test]
    async fn test_server_streaming_without_messages() {
        let router = router(builder().server_streaming(
            STREAM_HELLOS,
            |_ctx, _request, _writer| async move { Ok::<_, BoxError>(()) },
        ));
        let response = get(router, "/v1/stream/ada").await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_client_deadline_is_enforced() {
        let router = router(builder().unary(SAY_HELLO, |ctx: CallContext, request| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            hello(ctx, request).await
        }));
        let request = axum::http::Request::get("/v1/greeter/ada")
            .header("grpc-timeout", "10m")
            .body(Body::empty())
            .unwrap();
        let response = send(router, request).await;
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.json()["code"], 4);
    }

    #[tokio::test]
    async fn test_server_timeout_cancels_streaming_call() {
        let router = router(
            builder()
                .server_timeout(Duration::from_millis(20))
                .server_streaming(
                    STREAM_HELLOS,
                    |ctx: CallContext, _request, writer: ServerStreamWriter| async move {
                        writer.write(&reply("early")).await?;
                        ctx.cancellation_token().cancelled().await;
                        Ok::<_, BoxError>(())
                    },
                ),
        );
        let response = get(router, "/v1/stream/ada").await;
        let lines = response.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "early");
        assert_eq!(lines[1]["code"], 4);
    }

    #[tokio::test]
    async fn test_unannotated_methods_are_opt_in() {
        let hidden = router(builder().unary("transcoding.v1.Greeter.Unannotated", hello));
        let response = post(hidden, "/transcoding.v1.Greeter/Unannotated", r#"{"name":"x"}"#).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let exposed = router(
            builder()
                .unary("transcoding.v1.Greeter.Unannotated", hello)
                .expose_unannotated_methods(true),
        );
        let response = post(exposed, "/transcoding.v1.Greeter/Unannotated", r#"{"name":"x"}"#).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["message"], "Hello x");
    }

    #[tokio::test]
    async fn test_http_rule_override() {
        let router = router(
            builder()
                .unary("transcoding.v1.Greeter.SayHelloPost", hello)
                .http_rule(
                    "transcoding.v1.Greeter.SayHelloPost",
                    HttpRule::put("/v2/greeter/{name}"),
                ),
        );
        let request = axum::http::Request::put("/v2/greeter/eve").body(Body::empty()).unwrap();
        let response = send(router.clone(), request).await;
        assert_eq!(response.json()["message"], "Hello eve");

        let response = post(router, "/v1/greeter", "{}").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_routes_are_sorted_and_registry_is_indexed() {
        let gateway = builder().unary(SAY_HELLO, hello).build().unwrap();
        let routes: Vec<_> = gateway.routes().collect();

        let cancel = routes
            .iter()
            .position(|(_, path, _)| *path == "/v1/greeter/{name}:cancel")
            .unwrap();
        let hello = routes
            .iter()
            .position(|(_, path, _)| *path == "/v1/greeter/{name}")
            .unwrap();
        assert!(cancel < hello);
        assert_eq!(routes[hello].2, SAY_HELLO);
        assert_eq!(routes[hello].0, Method::GET);
        assert!(!routes.iter().any(|(_, _, method)| method.ends_with("Unannotated")));

        assert!(gateway.registry().contains_file(GREETER_FILE));
    }

    #[test]
    fn test_build_errors() {
        let err = builder().unary("transcoding.v1.Greeter.Nope", hello).build().unwrap_err();
        assert!(matches!(err, BuildError::MethodNotFound(_)));

        let err = builder().unary("transcoding.v1.Nope.SayHello", hello).build().unwrap_err();
        assert!(matches!(err, BuildError::ServiceNotFound(_)));

        let err = builder().unary(STREAM_HELLOS, hello).build().unwrap_err();
        assert!(matches!(
            err,
            BuildError::HandlerKindMismatch {
                expected: "server streaming",
                ..
            }
        ));

        let err = builder()
            .unary(SAY_HELLO, hello)
            .http_rule(
                "transcoding.v1.Greeter.SayHelloPost",
                HttpRule::get("/v1/greeter/{name}"),
            )
            .build()
            .unwrap_err();
        match err {
            BuildError::DuplicateRoute { first, second, .. } => {
                assert_eq!(first, SAY_HELLO);
                assert_eq!(second, "transcoding.v1.Greeter.SayHelloPost");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = builder()
            .unary(SAY_HELLO, hello)
            .http_rule(SAY_HELLO, HttpRule::get("/v1/{name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Template { .. }));

        let err = builder()
            .type_registry_file("missing.proto")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::FileNotFound(_)));
    }

    #[test]
    fn test_normalize_method_name() {
        assert_eq!(normalize_method_name("/pkg.Service/Method"), "pkg.Service.Method");
        assert_eq!(normalize_method_name("pkg.Service.Method"), "pkg.Service.Method");
    }
}
