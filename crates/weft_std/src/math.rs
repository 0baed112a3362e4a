//! Arithmetic over number ports.

use weft_core::{Behavior, HookError, Literal, Node, Port, PortType, RenderCtx};

#[derive(Clone, Copy, Debug, Default)]
pub struct Add;

impl Behavior for Add {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("v1", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_input(Port::input("v2", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_output(Port::output("sum", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let sum = ctx.number("v1") + ctx.number("v2");
        ctx.set_output("sum", Literal::Number(sum));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Multiply;

impl Behavior for Multiply {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("v1", PortType::Number).with_default(Literal::Number(1.0)));
        node.add_input(Port::input("v2", PortType::Number).with_default(Literal::Number(1.0)));
        node.add_output(Port::output("product", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let product = ctx.number("v1") * ctx.number("v2");
        ctx.set_output("product", Literal::Number(product));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Negate;

impl Behavior for Negate {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("value", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_output(Port::output("out", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        ctx.set_output("out", Literal::Number(-ctx.number("value")));
        Ok(())
    }
}
