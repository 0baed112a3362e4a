use weft_core::{Behavior, HookError, Literal, Node, Port, PortType, RenderCtx};

/// Emits the session clock: seconds since start and the frame counter.
/// Time-dependent, so every animation frame re-renders it and whatever
/// it feeds.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock;

impl Behavior for Clock {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.set_time_dependent(true);
        node.add_output(Port::output("time", PortType::Number));
        node.add_output(Port::output("frame", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        ctx.set_output("time", Literal::Number(ctx.time()));
        ctx.set_output("frame", Literal::Number(ctx.frame() as f64));
        Ok(())
    }
}
