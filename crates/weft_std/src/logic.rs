use weft_core::{Behavior, HookError, Literal, Node, Port, PortType, RenderCtx};

/// Selects one of two numbers by a boolean condition.
#[derive(Clone, Copy, Debug, Default)]
pub struct Switch;

impl Behavior for Switch {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(
            Port::input("condition", PortType::Boolean).with_default(Literal::Boolean(false)),
        );
        node.add_input(Port::input("then", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_input(Port::input("else", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_output(Port::output("out", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let picked = if ctx.boolean("condition") {
            ctx.number("then")
        } else {
            ctx.number("else")
        };
        ctx.set_output("out", Literal::Number(picked));
        Ok(())
    }
}
