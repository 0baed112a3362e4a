use weft_core::{Behavior, HookError, Literal, Node, Port, PortType, RenderCtx};

/// Logs whatever string arrives, at a configurable level. Renders (and
/// so logs) once per change of its inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct Log;

impl Behavior for Log {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(
            Port::input("value", PortType::String).with_default(Literal::String(String::new())),
        );
        node.add_input(
            Port::input("level", PortType::Choice)
                .with_options(["error", "warn", "info", "debug", "trace"])
                .with_default(Literal::Choice("info".to_string())),
        );
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let message = ctx.string("value");
        match ctx.string("level").as_str() {
            "error" => log::error!("{message}"),
            "warn" => log::warn!("{message}"),
            "debug" => log::debug!("{message}"),
            "trace" => log::trace!("{message}"),
            _ => log::info!("{message}"),
        }
        Ok(())
    }
}
