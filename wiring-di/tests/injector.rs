mod injector_test {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiring_di::component::Component;
    use wiring_di::factory::Factory;
    use wiring_di::injector::{Injector, InjectorBuilder, InjectorHandle};
    use wiring_di::instance_provider::{InstancePtr, TypeKey, TypedInstanceProvider};
    use wiring_di::normalizer::NormalizedComponent;
    use wiring_di::{Error, InjectionError};

    #[derive(Debug)]
    struct ServerContext {
        name: &'static str,
    }

    #[derive(Debug)]
    struct Server {
        context: InstancePtr<ServerContext>,
    }

    impl Server {
        fn new(context: InstancePtr<ServerContext>) -> Self {
            Self { context }
        }
    }

    struct RequestContext {
        path: &'static str,
    }

    struct RequestHandler {
        server: InstancePtr<ServerContext>,
        request: InstancePtr<RequestContext>,
    }

    impl RequestHandler {
        fn new(server: InstancePtr<ServerContext>, request: InstancePtr<RequestContext>) -> Self {
            Self { server, request }
        }
    }

    trait Middleware: Send + Sync {
        fn name(&self) -> String;
    }

    struct Logging;

    impl Middleware for Logging {
        fn name(&self) -> String {
            "logging".to_string()
        }
    }

    struct Auth {
        context: InstancePtr<RequestContext>,
    }

    impl Middleware for Auth {
        fn name(&self) -> String {
            format!("auth {}", self.context.path)
        }
    }

    struct Connection {
        id: usize,
        server: InstancePtr<ServerContext>,
    }

    struct StartupContext {
        startup_time: Mutex<String>,
    }

    struct ParsedRequest {
        words: Vec<String>,
    }

    trait WordHandler: Send + Sync {
        fn handle(&self) -> String;
    }

    struct WordHandlerImpl {
        startup: InstancePtr<StartupContext>,
        request: InstancePtr<ParsedRequest>,
    }

    impl WordHandler for WordHandlerImpl {
        fn handle(&self) -> String {
            format!(
                "started at {}, got {}",
                self.startup.startup_time.lock(),
                self.request.words.join("|")
            )
        }
    }

    struct WordServer {
        injector: InstancePtr<InjectorHandle>,
    }

    impl WordServer {
        fn run(&self, lines: &[&str]) -> Result<Vec<String>, Error> {
            let startup = self.injector.get::<StartupContext>()?;
            *startup.startup_time.lock() = "noon".to_string();

            lines
                .iter()
                .map(|line| -> Result<String, Error> {
                    let request = ParsedRequest {
                        words: line.split_whitespace().map(str::to_string).collect(),
                    };
                    let child = self.injector.child(
                        word_handler_component().bind_instance(InstancePtr::new(request)),
                    )?;

                    Ok(child.get::<dyn WordHandler>()?.handle())
                })
                .collect()
        }
    }

    fn word_handler_component() -> Component {
        Component::named("word handler")
            .register_constructor(
                |startup: InstancePtr<StartupContext>, request: InstancePtr<ParsedRequest>| {
                    WordHandlerImpl { startup, request }
                },
            )
            .bind::<dyn WordHandler, WordHandlerImpl, _>(|handler| handler)
    }

    fn word_server_component() -> Component {
        Component::named("word server")
            .register_constructor(|| StartupContext {
                startup_time: Mutex::new("unknown".to_string()),
            })
            .register_constructor(|injector: InstancePtr<InjectorHandle>| WordServer { injector })
    }

    type DropLog = Mutex<Vec<&'static str>>;

    struct Pool(InstancePtr<DropLog>);

    impl Drop for Pool {
        fn drop(&mut self) {
            self.0.lock().push("pool");
        }
    }

    struct Repository(InstancePtr<DropLog>, InstancePtr<Pool>);

    impl Drop for Repository {
        fn drop(&mut self) {
            self.0.lock().push("repository");
        }
    }

    struct Service(InstancePtr<DropLog>, InstancePtr<Repository>);

    impl Drop for Service {
        fn drop(&mut self) {
            self.0.lock().push("service");
        }
    }

    fn server_context_component(context: InstancePtr<ServerContext>) -> Component {
        Component::named("server context").bind_instance(context)
    }

    fn server_component() -> Component {
        Component::named("server")
            .register_constructor(Server::new)
            .require::<ServerContext>()
    }

    fn request_component(path: &'static str) -> Component {
        Component::named("request")
            .bind_instance(InstancePtr::new(RequestContext { path }))
            .register_constructor(RequestHandler::new)
    }

    #[test]
    fn should_inject_server_in_any_install_order() {
        let context = InstancePtr::new(ServerContext { name: "main" });

        for component in [
            Component::new()
                .install(server_context_component(context.clone()))
                .install(server_component()),
            Component::new()
                .install(server_component())
                .install(server_context_component(context.clone())),
        ] {
            let injector = Injector::new(component).unwrap();
            let server = injector.get::<Server>().unwrap();

            assert!(InstancePtr::ptr_eq(&server.context, &context));
            assert_eq!(server.context.name, "main");
        }
    }

    #[test]
    fn should_share_parent_instances_between_sibling_injectors() {
        let context = InstancePtr::new(ServerContext { name: "main" });
        let normalized = NormalizedComponent::new(server_context_component(context.clone())).unwrap();

        let first = Injector::from_normalized(&normalized, request_component("/first")).unwrap();
        let second = Injector::from_normalized(&normalized, request_component("/second")).unwrap();

        let first_handler = first.get::<RequestHandler>().unwrap();
        let second_handler = second.get::<RequestHandler>().unwrap();

        assert_eq!(first_handler.request.path, "/first");
        assert_eq!(second_handler.request.path, "/second");
        assert!(InstancePtr::ptr_eq(&first_handler.server, &context));
        assert!(InstancePtr::ptr_eq(&second_handler.server, &context));
        assert!(!InstancePtr::ptr_eq(&first_handler, &second_handler));
    }

    #[test]
    fn should_construct_parent_bindings_per_child_injector() {
        let constructed = InstancePtr::new(AtomicUsize::new(0));
        let counter = constructed.clone();

        let normalized = NormalizedComponent::new(
            Component::new()
                .bind_instance(InstancePtr::new(ServerContext { name: "main" }))
                .register_constructor(move |context: InstancePtr<ServerContext>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Server::new(context)
                }),
        )
        .unwrap();

        let first = Injector::from_normalized(&normalized, Component::new()).unwrap();
        let second = Injector::from_normalized(&normalized, Component::new()).unwrap();

        let first_server = first.get::<Server>().unwrap();
        first.get::<Server>().unwrap();
        let second_server = second.get::<Server>().unwrap();

        assert_eq!(constructed.load(Ordering::SeqCst), 2);
        assert!(!InstancePtr::ptr_eq(&first_server, &second_server));
    }

    #[test]
    fn should_combine_parent_and_child_multibindings() {
        let normalized = NormalizedComponent::new(
            Component::new().add_instance_multibinding(
                InstancePtr::new(Logging) as InstancePtr<dyn Middleware>
            ),
        )
        .unwrap();

        let injector = Injector::from_normalized(
            &normalized,
            request_component("/admin")
                .register_constructor(|context: InstancePtr<RequestContext>| Auth { context })
                .add_multibinding::<dyn Middleware, Auth, _>(|auth| auth),
        )
        .unwrap();

        let middleware = injector.get_multibindings::<dyn Middleware>().unwrap();

        assert_eq!(
            middleware
                .iter()
                .map(|middleware| middleware.name())
                .collect::<Vec<_>>(),
            ["logging", "auth /admin"]
        );

        let parent_only = Injector::from_normalized(&normalized, Component::new()).unwrap();
        assert_eq!(
            parent_only
                .get_multibindings::<dyn Middleware>()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn should_create_distinct_instances_from_factory() {
        let injector = Injector::new(
            Component::new()
                .bind_instance(InstancePtr::new(ServerContext { name: "main" }))
                .register_factory(
                    |(server,): &(InstancePtr<ServerContext>,), id: usize| Connection {
                        id,
                        server: server.clone(),
                    },
                ),
        )
        .unwrap();

        let factory = injector.get::<Factory<usize, Connection>>().unwrap();
        let first = factory.create(1).unwrap();
        let second = factory.create(2).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(InstancePtr::ptr_eq(&first.server, &second.server));
    }

    #[test]
    fn should_create_request_injectors_from_injected_injector() {
        let injector = Injector::new(word_server_component()).unwrap();
        let server = injector.get::<WordServer>().unwrap();

        let responses = server.run(&["foo bar", "baz"]).unwrap();

        assert_eq!(
            responses,
            ["started at noon, got foo|bar", "started at noon, got baz"]
        );
        // request injectors only own their handlers
        assert_eq!(injector.constructed_count(), 2);
        assert!(injector.unsafe_get::<ParsedRequest>().unwrap().is_none());
    }

    #[test]
    fn should_reject_request_injector_missing_requirements() {
        let injector = Injector::new(word_server_component()).unwrap();
        let server = injector.get::<WordServer>().unwrap();

        assert!(matches!(
            server.injector.child(word_handler_component()).unwrap_err(),
            Error::Normalization(..)
        ));
    }

    #[test]
    fn should_release_instances_in_reverse_construction_order() {
        let log = InstancePtr::new(DropLog::default());

        let injector = InjectorBuilder::new(
            Component::new()
                .bind_instance(log.clone())
                .register_constructor(
                    |log: InstancePtr<DropLog>, repository: InstancePtr<Repository>| {
                        Service(log, repository)
                    },
                )
                .register_constructor(|log: InstancePtr<DropLog>, pool: InstancePtr<Pool>| {
                    Repository(log, pool)
                })
                .register_constructor(|log: InstancePtr<DropLog>| Pool(log)),
        )
        .build()
        .unwrap();

        injector.get::<Service>().unwrap();
        assert_eq!(injector.constructed_count(), 3);
        assert!(log.lock().is_empty());

        drop(injector);

        assert_eq!(*log.lock(), ["service", "repository", "pool"]);
        assert_eq!(InstancePtr::strong_count(&log), 1);
    }

    #[test]
    fn should_fail_on_unbound_type_only_at_lookup() {
        let injector = Injector::new(server_context_component(InstancePtr::new(ServerContext {
            name: "main",
        })))
        .unwrap();

        assert!(matches!(
            injector.get::<Server>().unwrap_err(),
            InjectionError::TypeNotProvided(key) if key == TypeKey::of::<Server>()
        ));
        assert!(injector.unsafe_get::<Server>().unwrap().is_none());
        assert!(injector.unsafe_get::<ServerContext>().unwrap().is_some());
    }

    #[test]
    fn should_list_bound_keys_of_both_layers() {
        let normalized = NormalizedComponent::new(server_context_component(InstancePtr::new(
            ServerContext { name: "main" },
        )))
        .unwrap();
        let injector = Injector::from_normalized(&normalized, server_component()).unwrap();

        let mut expected = vec![TypeKey::of::<Server>(), TypeKey::of::<ServerContext>()];
        expected.sort_by_key(|key| key.name());

        assert_eq!(injector.bound_keys(), expected);
    }
}
