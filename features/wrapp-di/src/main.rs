use std::sync::Arc;

use tracing_subscriber::{prelude::*, EnvFilter};
use wrapp_di::{
    ChildScopeOptions, DependencyError, DependencyInfo, DiHandle, InstanceFactory, KernelBuilder,
    StrategyBuilder,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("wrapp_di=debug".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let root = KernelBuilder::new()
        .add_instance("greetings".to_string())
        .add(StrategyBuilder::factory(GreeterFactory).singleton())
        .named_scope("request", |registration| {
            registration.add(StrategyBuilder::delegate(|_| Ok(RequestId(7))).singleton_per_scope());
        })
        .build()?;

    println!("{}", root.describe());

    let request = root.create_child_scope(ChildScopeOptions::new().name("request"))?;
    let greeter = request.locate_required::<Greeter>()?;
    let id = request.locate_required::<RequestId>()?;
    println!("{} for request {}", greeter.prefix, id.0);

    request.dispose();
    root.dispose();
    Ok(())
}

#[derive(Debug)]
struct RequestId(u32);

#[derive(Debug)]
struct Greeter {
    prefix: Arc<String>,
}

struct GreeterFactory;
impl InstanceFactory for GreeterFactory {
    type Provides = Greeter;

    fn get_dependencies() -> Vec<DependencyInfo> {
        vec![DependencyInfo::of::<String>().member("prefix")]
    }

    fn construct(&self, di: &mut DiHandle<'_>) -> Result<Self::Provides, DependencyError> {
        let prefix = di.dependencies().get::<String>("prefix")?;
        Ok(Greeter { prefix })
    }
}
