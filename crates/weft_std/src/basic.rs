use weft_core::{Behavior, HookError, Literal, Node, Port, PortType, RenderCtx};

/// Holds a number. The in-port is the editable value; rendering copies
/// it to the out-port.
#[derive(Clone, Copy, Debug, Default)]
pub struct Number;

impl Behavior for Number {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("value", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_output(Port::output("out", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        ctx.set_output("out", Literal::Number(ctx.number("value")));
        Ok(())
    }
}

/// A manual trigger source: a pulse on the in-port fires the out-port.
#[derive(Clone, Copy, Debug, Default)]
pub struct Button;

impl Behavior for Button {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("press", PortType::Trigger));
        node.add_output(Port::output("pressed", PortType::Trigger));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        if ctx.triggered("press") {
            ctx.set_output("pressed", Literal::Trigger);
        }
        Ok(())
    }
}
