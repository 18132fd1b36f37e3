//! Listings of the configured catalogue sections.

use crate::context::{CliContext, CliResult};
use crate::output::{render_proxies, render_repos, render_services};

pub(crate) fn handle_repos(ctx: &CliContext) -> CliResult<String> {
    render_repos(&ctx.config.config().containers, ctx.output)
}

pub(crate) fn handle_services(ctx: &CliContext) -> CliResult<String> {
    render_services(&ctx.config.config().services, ctx.output)
}

pub(crate) fn handle_proxies(ctx: &CliContext) -> CliResult<String> {
    render_proxies(&ctx.config.config().proxies, ctx.output)
}
