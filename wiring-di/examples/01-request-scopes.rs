// note: this example assumes you've analyzed the previous one

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;
use wiring_di::component::Component;
use wiring_di::factory::Factory;
use wiring_di::injector::Injector;
use wiring_di::instance_provider::{InstancePtr, TypedInstanceProvider};
use wiring_di::normalizer::NormalizedComponent;
use wiring_di::InjectionError;

// lives as long as the whole server
struct ServerContext {
    handled: AtomicUsize,
}

// a new one is supplied for every request
struct Request {
    path: String,
}

// plugins are collected from all components with multibindings
trait Plugin: Send + Sync {
    fn describe(&self, request: &Request) -> String;
}

struct PathLogger;

impl Plugin for PathLogger {
    fn describe(&self, request: &Request) -> String {
        format!("path: {}", request.path)
    }
}

struct Response {
    body: String,
}

struct Audit(String);

impl PathLogger {
    fn audit(handler: &RequestHandler) -> Audit {
        Audit(format!("audited {}", handler.request.path))
    }
}

struct RequestHandler {
    server: InstancePtr<ServerContext>,
    request: InstancePtr<Request>,
    responses: InstancePtr<Factory<String, Response>>,
}

impl RequestHandler {
    fn new(
        server: InstancePtr<ServerContext>,
        request: InstancePtr<Request>,
        responses: InstancePtr<Factory<String, Response>>,
    ) -> Self {
        Self {
            server,
            request,
            responses,
        }
    }

    fn handle(&self, plugins: &[InstancePtr<dyn Plugin>]) -> Result<Response, InjectionError> {
        let count = self.server.handled.fetch_add(1, Ordering::SeqCst) + 1;
        let notes = plugins
            .iter()
            .map(|plugin| plugin.describe(&self.request))
            .collect::<Vec<_>>()
            .join(", ");

        self.responses
            .create(format!("request #{count} for {} ({notes})", self.request.path))
    }
}

fn server_component() -> Component {
    Component::named("server")
        .bind_instance(InstancePtr::new(ServerContext {
            handled: AtomicUsize::new(0),
        }))
        .register_constructor(RequestHandler::new)
        // every call to the factory creates a new response
        .register_factory(|_: &(), body: String| Response { body })
        .register_constructor(|| PathLogger)
        .add_multibinding::<dyn Plugin, PathLogger, _>(|logger| logger)
        // the request is only known when it arrives
        .require::<Request>()
}

// note: for the sake of simplicity, errors are unwrapped, rather than gracefully handled
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // the shared part is normalized only once
    let server =
        NormalizedComponent::new(server_component()).expect("error normalizing server component");

    for path in ["/", "/about", "/contact"] {
        // creating an injector on top of a normalized component only validates the small,
        // request-specific part
        let injector = Injector::from_normalized(
            &server,
            Component::named("request").bind_instance(InstancePtr::new(Request {
                path: path.to_string(),
            })),
        )
        .expect("error creating request injector");

        let handler = injector
            .get::<RequestHandler>()
            .expect("error creating RequestHandler");
        let plugins = injector
            .get_multibindings::<dyn Plugin>()
            .expect("error creating plugins");

        let response = handler
            .handle(&plugins)
            .expect("error creating response");
        println!("{}", response.body);

        // the handler is released together with the injector, while the server context stays
    }

    // alternatively, a running injector can create child injectors, which reuse the instances it
    // has already created instead of constructing their own
    let running = Injector::new(
        Component::new()
            .install(server_component())
            .bind_instance(InstancePtr::new(Request {
                path: "/health".to_string(),
            })),
    )
    .expect("error creating server injector");
    let handler = running
        .get::<RequestHandler>()
        .expect("error creating RequestHandler");

    let child = running
        .child(Component::named("audit").register_constructor(
            |handler: InstancePtr<RequestHandler>| PathLogger::audit(&handler),
        ))
        .expect("error creating child injector");

    println!("{}", child.get::<Audit>().expect("error creating Audit").0);
    assert!(InstancePtr::ptr_eq(
        &handler,
        &child.get::<RequestHandler>().expect("error getting RequestHandler")
    ));
}
