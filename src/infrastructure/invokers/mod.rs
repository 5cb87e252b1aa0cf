pub mod claude_cli;
pub mod external_http;
pub mod routing;

pub use claude_cli::ClaudeCliInvoker;
pub use external_http::ExternalHttpInvoker;
pub use routing::RoutingInvoker;
