//! Route-derived event fields.

use tracing::debug;

use super::instrument::Routing;
use crate::logger::{Logger, with_logger};
use crate::router::RouteMatch;
use crate::telemetry::Event;

const CONTROLLER: &str = "controller";
const ACTION: &str = "action";

/// Overwrites the provisional `name` with the declared route and, for
/// controller-style apps, records parameters, controller and action.
///
/// Missing or incomplete route data only costs the optional fields.
pub(crate) fn record(
    event: &mut Event,
    routing: Routing,
    route: Option<RouteMatch>,
    logger: Option<&Logger>,
) {
    if routing == Routing::Literal {
        return;
    }
    let Some(route) = route else {
        with_logger(logger, || debug!("no route matched the request, skipping route fields"));
        return;
    };

    let declared = format!("{} {}", route.method(), route.pattern());
    event.add_field("name", declared.clone());
    event.add_field("request.route", declared);

    if routing != Routing::Controller {
        return;
    }

    let mut controller = None;
    let mut action = None;
    for (name, value) in route.params() {
        match name.as_str() {
            CONTROLLER => controller = Some(value.as_str()),
            ACTION => action = Some(value.as_str()),
            _ => event.add_field(format!("request.params.{name}"), value.as_str()),
        }
    }

    match (controller.filter(|c| !c.is_empty()), action.filter(|a| !a.is_empty())) {
        (Some(controller), Some(action)) => {
            event.add_field("request.controller", controller);
            event.add_field("request.action", action);
            event.add_field("name", format!("{controller}#{action}"));
        }
        _ => with_logger(logger, || {
            debug!(route = %route.pattern(), "route has no controller#action target, skipping");
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use crate::telemetry::Value;

    fn hello_route() -> RouteMatch {
        RouteMatch::new(
            Method::Get,
            "/hello/:name",
            vec![
                ("name".into(), "Honeycomb".into()),
                ("controller".into(), "hello".into()),
                ("action".into(), "show".into()),
            ],
        )
    }

    fn provisional() -> Event {
        let mut event = Event::new();
        event.add_field("name", "GET /hello/Honeycomb");
        event
    }

    #[test]
    fn literal_routing_leaves_event_alone() {
        let mut event = provisional();
        record(&mut event, Routing::Literal, Some(hello_route()), None);
        assert_eq!(event.get("name"), Some(&Value::from("GET /hello/Honeycomb")));
        assert!(!event.contains("request.route"));
    }

    #[test]
    fn pattern_routing_reports_declared_route_only() {
        let mut event = provisional();
        record(&mut event, Routing::Pattern, Some(hello_route()), None);
        assert_eq!(event.get("name"), Some(&Value::from("GET /hello/:name")));
        assert_eq!(event.get("request.route"), Some(&Value::from("GET /hello/:name")));
        assert!(!event.contains("request.params.name"));
        assert!(!event.contains("request.controller"));
    }

    #[test]
    fn controller_routing_reports_params_and_target() {
        let mut event = provisional();
        record(&mut event, Routing::Controller, Some(hello_route()), None);
        assert_eq!(event.get("name"), Some(&Value::from("hello#show")));
        assert_eq!(event.get("request.route"), Some(&Value::from("GET /hello/:name")));
        assert_eq!(event.get("request.params.name"), Some(&Value::from("Honeycomb")));
        assert_eq!(event.get("request.controller"), Some(&Value::from("hello")));
        assert_eq!(event.get("request.action"), Some(&Value::from("show")));
        assert!(!event.contains("request.params.controller"));
    }

    #[test]
    fn controller_routing_without_target_keeps_route_name() {
        let mut event = provisional();
        let route = RouteMatch::new(Method::Get, "/hello/:name", vec![("name".into(), "x".into())]);
        record(&mut event, Routing::Controller, Some(route), None);
        assert_eq!(event.get("name"), Some(&Value::from("GET /hello/:name")));
        assert!(!event.contains("request.controller"));
    }

    #[test]
    fn missing_route_is_skipped() {
        let mut event = provisional();
        record(&mut event, Routing::Controller, None, None);
        assert_eq!(event.get("name"), Some(&Value::from("GET /hello/Honeycomb")));
        assert!(!event.contains("request.route"));
    }
}
