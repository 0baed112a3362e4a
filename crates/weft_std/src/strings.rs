use weft_core::{Behavior, HookError, Literal, Node, Port, PortType, RenderCtx};

/// Joins two strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct Concat;

impl Behavior for Concat {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("a", PortType::String).with_default(Literal::String(String::new())));
        node.add_input(Port::input("b", PortType::String).with_default(Literal::String(String::new())));
        node.add_output(Port::output("out", PortType::String));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let mut out = ctx.string("a");
        out.push_str(&ctx.string("b"));
        ctx.set_output("out", Literal::String(out));
        Ok(())
    }
}
