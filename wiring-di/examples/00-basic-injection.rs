use tracing_subscriber::EnvFilter;
use wiring_di::component::Component;
use wiring_di::injector::Injector;
use wiring_di::instance_provider::{InstancePtr, TypedInstanceProvider};

// this is a trait we would like to inject
trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

// configuration coming from the outside world
struct GreeterConfig {
    greeting: &'static str,
}

// an implementation of the above trait, with a dependency of its own
struct ConfiguredGreeter {
    config: InstancePtr<GreeterConfig>,
}

impl ConfiguredGreeter {
    fn new(config: InstancePtr<GreeterConfig>) -> Self {
        Self { config }
    }
}

impl Greeter for ConfiguredGreeter {
    fn greet(&self) -> String {
        format!("{} world!", self.config.greeting)
    }
}

// this is the type we would like to get in the end
struct Application {
    greeter: InstancePtr<dyn Greeter>,
}

impl Application {
    fn new(greeter: InstancePtr<dyn Greeter>) -> Self {
        Self { greeter }
    }

    fn run(&self) {
        println!("{}", self.greeter.greet());
    }
}

// components group related bindings and declare what they need from others
fn greeter_component() -> Component {
    Component::named("greeter")
        // dyn Greeter is provided by ConfiguredGreeter
        .bind::<dyn Greeter, ConfiguredGreeter, _>(|greeter| greeter)
        .register_constructor(ConfiguredGreeter::new)
        .require::<GreeterConfig>()
}

fn application_component() -> Component {
    Component::named("application")
        .register_constructor(Application::new)
        .install(greeter_component())
        .bind_instance(InstancePtr::new(GreeterConfig { greeting: "Hello" }))
}

// note: for the sake of simplicity, errors are unwrapped, rather than gracefully handled
fn main() {
    // run with RUST_LOG=wiring_di=trace to see what the injector is doing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // all bindings are validated here, so a missing or duplicate binding is reported before
    // anything gets constructed
    let injector =
        Injector::new(application_component()).expect("error creating the injector");

    let application = injector
        .get::<Application>()
        .expect("error creating Application");

    // prints "Hello world!"
    application.run();
}
