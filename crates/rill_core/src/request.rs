//! Request / response wiring
//!
//! A component can serve requests arriving on its request source. Each route
//! maps to either an action, whose correlated outputs come back as the
//! response, or a function answered immediately from current state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::Stream;
use serde_json::{json, Value};

use crate::action::{Action, ActionBus, Request, ACTION_KEY, REQ_ID_KEY};
use crate::calculated::Calculated;
use crate::error::{ComponentError, Result};
use crate::runtime::{Diag, Runtime};
use crate::sources::RequestSource;

/// Action kind tagged on responses produced by function handlers
pub const FUNCTION_ACTION: &str = "FUNCTION";

/// How a route is served
#[derive(Clone)]
pub enum RequestHandler {
    /// Dispatch this action with the request body as data
    Action(String),
    /// Answer from `(state, request)`
    Function(Rc<dyn Fn(&Value, &Request) -> Value>),
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestHandler::Action(kind) => write!(f, "Action({})", kind),
            RequestHandler::Function(_) => f.write_str("Function(<fn>)"),
        }
    }
}

/// Method to route to handler
pub type RequestMap = IndexMap<String, IndexMap<String, RequestHandler>>;

/// Selects correlated responses by the action that produced them
#[derive(Clone)]
pub struct ResponseSelector {
    responses: Stream<Value>,
}

impl ResponseSelector {
    pub fn new(responses: Stream<Value>) -> Self {
        Self { responses }
    }

    pub fn all(&self) -> Stream<Value> {
        self.responses.clone()
    }

    /// Responses whose `_action` is one of `kinds`.
    pub fn select(&self, kinds: &[&str]) -> Stream<Value> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        self.responses.filter(move |value| {
            value
                .get(ACTION_KEY)
                .and_then(Value::as_str)
                .is_some_and(|kind| kinds.iter().any(|k| k == kind))
        })
    }
}

/// `selector -> command name -> response stream`
pub type ResponseFn = Rc<dyn Fn(&ResponseSelector) -> IndexMap<String, Stream<Value>>>;

/// Everything the request wiring needs from the component
pub(crate) struct RequestContext<'a> {
    pub source: Rc<dyn RequestSource>,
    pub bus: &'a ActionBus,
    pub current: Rc<RefCell<Value>>,
    pub calculated: Rc<Calculated>,
    pub diag: &'a Diag,
}

/// Subscribe every route and merge the correlated responses.
pub(crate) fn wire_requests(map: &RequestMap, ctx: &RequestContext<'_>) -> Result<Stream<Value>> {
    let mut responses = Vec::new();
    for (method, routes) in map {
        for (route, handler) in routes {
            let requests = ctx.source.route(method, route).ok_or_else(|| {
                ComponentError::UnknownRequestMethod {
                    component: ctx.diag.component().to_string(),
                    method: method.clone(),
                }
            })?;
            responses.push(serve(requests, handler.clone(), ctx));
        }
    }
    Ok(Stream::merge(responses))
}

fn serve(requests: Stream<Request>, handler: RequestHandler, ctx: &RequestContext<'_>) -> Stream<Value> {
    let source = Rc::clone(&ctx.source);
    let bus = ctx.bus.clone();
    let current = Rc::clone(&ctx.current);
    let calculated = Rc::clone(&ctx.calculated);
    let diag = ctx.diag.clone();

    requests
        .drop_repeats_by(|a, b| a.id == b.id)
        .map(move |request| {
            if request.id.is_empty() {
                diag.error(format_args!(
                    "request without id on {} {}; ignored",
                    request.method, request.url
                ));
                return Stream::never();
            }
            match &handler {
                RequestHandler::Action(kind) => {
                    diag.trace(format_args!(
                        "request {} {} dispatched as <{}>",
                        request.method, request.url, kind
                    ));
                    let responses = source.responses(&[request.id.clone()]);
                    bus.dispatch(Action {
                        kind: kind.clone(),
                        data: request.body.clone(),
                        req_id: Some(request.id.clone()),
                        request: Some(request.clone()),
                    });
                    responses
                }
                RequestHandler::Function(f) => {
                    let state = calculated.apply(&current.borrow().clone());
                    let data = f(&state, request);
                    Stream::of(json!({
                        REQ_ID_KEY: request.id,
                        ACTION_KEY: FUNCTION_ACTION,
                        "data": data,
                    }))
                }
            }
        })
        .flatten()
}

/// Map named response streams to `{_reqId, _action, command, data}`.
///
/// Values without a request id cannot be answered; they are reported and
/// dropped.
pub(crate) fn wire_responses(
    response: &ResponseFn,
    responses: Stream<Value>,
    runtime: &Runtime,
    diag: &Diag,
) -> Stream<Value> {
    let named = response(&ResponseSelector::new(responses));
    Stream::merge(
        named
            .into_iter()
            .map(|(command, stream)| {
                let runtime = runtime.clone();
                let diag = diag.clone();
                stream.filter_map(move |value| {
                    let Some(req_id) = value.get(REQ_ID_KEY).filter(|id| !id.is_null()) else {
                        runtime.report(ComponentError::MissingRequestId {
                            component: diag.component().to_string(),
                            command: command.clone(),
                        });
                        return None;
                    };
                    diag.trace(format_args!("response '{}' sent", command));
                    Some(json!({
                        REQ_ID_KEY: req_id,
                        ACTION_KEY: value.get(ACTION_KEY).cloned().unwrap_or(Value::Null),
                        "command": command,
                        "data": value.get("data").cloned().unwrap_or_else(|| value.clone()),
                    }))
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionBus;
    use rill_stream::{Recorder, Scheduler, Subject};

    struct FakeSource {
        gets: Subject<Request>,
        replies: Subject<Value>,
    }

    impl RequestSource for FakeSource {
        fn route(&self, method: &str, _pattern: &str) -> Option<Stream<Request>> {
            (method == "get").then(|| self.gets.stream())
        }

        fn responses(&self, ids: &[String]) -> Stream<Value> {
            let ids = ids.to_vec();
            self.replies.stream().filter(move |v| {
                v.get(REQ_ID_KEY)
                    .and_then(Value::as_str)
                    .is_some_and(|id| ids.iter().any(|i| i == id))
            })
        }
    }

    fn request(id: &str) -> Request {
        Request {
            id: id.into(),
            method: "get".into(),
            url: "/items".into(),
            params: Value::Null,
            body: json!({ "q": 1 }),
        }
    }

    struct Fixture {
        source: Rc<FakeSource>,
        bus: ActionBus,
        rt: Runtime,
        diag: Diag,
    }

    fn fixture() -> Fixture {
        let diag = Diag::new("Api", 0, false);
        let scheduler = Scheduler::new();
        Fixture {
            source: Rc::new(FakeSource {
                gets: Subject::new(),
                replies: Subject::new(),
            }),
            bus: ActionBus::new(Stream::never(), None, &scheduler, 10, 10, diag.clone()),
            rt: Runtime::default(),
            diag,
        }
    }

    fn routes(handler: RequestHandler) -> RequestMap {
        let mut routes = IndexMap::new();
        routes.insert("/items".to_string(), handler);
        let mut map = RequestMap::new();
        map.insert("get".to_string(), routes);
        map
    }

    fn context(fx: &Fixture, state: Value) -> RequestContext<'_> {
        RequestContext {
            source: fx.source.clone(),
            bus: &fx.bus,
            current: Rc::new(RefCell::new(state)),
            calculated: Rc::new(Calculated::new("Api", IndexMap::new(), true, None)),
            diag: &fx.diag,
        }
    }

    #[test]
    fn test_function_handler_answers_from_state() {
        let fx = fixture();
        let handler = RequestHandler::Function(Rc::new(|state: &Value, _: &Request| state["n"].clone()));
        let out = wire_requests(&routes(handler), &context(&fx, json!({ "n": 4 }))).unwrap();
        let rec = Recorder::new(&out);
        fx.source.gets.push(request("r1"));
        assert_eq!(
            rec.values(),
            vec![json!({ "_reqId": "r1", "_action": "FUNCTION", "data": 4 })]
        );
    }

    #[test]
    fn test_action_handler_dispatches_and_listens() {
        let fx = fixture();
        let actions = Recorder::new(&fx.bus.select("LIST"));
        let out = wire_requests(
            &routes(RequestHandler::Action("LIST".into())),
            &context(&fx, Value::Null),
        )
        .unwrap();
        let rec = Recorder::new(&out);

        fx.source.gets.push(request("r2"));
        fx.source.gets.push(request("r2"));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions.values()[0].req_id.as_deref(), Some("r2"));

        fx.source.replies.push(json!({ "_reqId": "other" }));
        fx.source.replies.push(json!({ "_reqId": "r2", "_action": "LIST", "data": [1] }));
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let fx = fixture();
        let mut map = routes(RequestHandler::Action("X".into()));
        map.insert("put".to_string(), IndexMap::new());
        map["put"].insert("/x".to_string(), RequestHandler::Action("Y".into()));
        assert!(matches!(
            wire_requests(&map, &context(&fx, Value::Null)),
            Err(ComponentError::UnknownRequestMethod { .. })
        ));
    }

    #[test]
    fn test_response_requires_request_id() {
        let fx = fixture();
        let input = Subject::new();
        let response: ResponseFn = Rc::new(|select: &ResponseSelector| {
            let mut out = IndexMap::new();
            out.insert("listed".to_string(), select.select(&["LIST"]));
            out
        });
        let sent = wire_responses(&response, input.stream(), &fx.rt, &fx.diag);
        let rec = Recorder::new(&sent);

        input.push(json!({ "_action": "LIST", "data": 1 }));
        input.push(json!({ "_reqId": "r", "_action": "LIST", "data": 2 }));
        input.push(json!({ "_reqId": "r", "_action": "OTHER", "data": 3 }));

        assert_eq!(
            rec.values(),
            vec![json!({ "_reqId": "r", "_action": "LIST", "command": "listed", "data": 2 })]
        );
        assert!(matches!(
            fx.rt.reported_errors().as_slice(),
            [ComponentError::MissingRequestId { .. }]
        ));
    }
}
