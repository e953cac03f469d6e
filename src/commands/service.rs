use std::process::ExitCode;
use svcpkg::daemon::{DaemonClient, Request};

use super::output::{entries, field, report};
use crate::args::ServiceCommands;

pub(crate) async fn cmd_service(client: &DaemonClient, command: ServiceCommands) -> ExitCode {
    let request = match command {
        ServiceCommands::Start { name } => Request::StartService { name },
        ServiceCommands::Stop { name } => Request::StopService { name },
        ServiceCommands::Restart { name } => Request::RestartService { name },
        ServiceCommands::Status { name } => Request::ServiceStatus { name },
        ServiceCommands::List => Request::ListServices,
    };
    let listing = matches!(request, Request::ListServices);

    let outcome = client.send(&request).await;
    let code = report(&outcome);
    if listing {
        for svc in entries(&outcome, "services") {
            match svc.get("pid").and_then(|p| p.as_i64()) {
                Some(pid) => println!("- {}: {} (PID {})", field(svc, "name"), field(svc, "status"), pid),
                None => println!("- {}: {}", field(svc, "name"), field(svc, "status")),
            }
        }
    }
    code
}
