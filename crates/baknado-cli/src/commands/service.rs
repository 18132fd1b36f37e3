//! Container management for one configured service.

use crate::cli::ServiceCommand;
use crate::context::{CliContext, CliError, CliResult, config_error, store_error};
use crate::output::render_containers;

pub(crate) async fn handle_service(
    ctx: &mut CliContext,
    name: &str,
    command: ServiceCommand,
) -> CliResult<String> {
    let service = ctx.registry.service(name).map_err(store_error)?;
    match command {
        ServiceCommand::List => {
            let containers = service.list_containers().await.map_err(store_error)?;
            render_containers(&containers, ctx.output)
        }
        ServiceCommand::Create { container } => {
            service
                .create_container(&container)
                .await
                .map_err(store_error)?;
            let registered = ctx
                .config
                .add_container(&container, name)
                .map_err(config_error)?;
            let mut message = format!("Created container {container} in service {name}");
            if registered {
                message.push_str(&format!(
                    "\nRegistered repository {container} in {}",
                    ctx.config.path().display()
                ));
            }
            Ok(message)
        }
        ServiceCommand::Delete { container } => {
            if service
                .delete_container(&container)
                .await
                .map_err(store_error)?
            {
                Ok(format!("Deleted container {container} from service {name}"))
            } else {
                Err(CliError::validation(format!(
                    "container '{container}' not found in service {name}"
                )))
            }
        }
    }
}
