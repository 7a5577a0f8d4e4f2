use gradflow::prelude::*;

fn main() -> Result<()> {
    let a = Variable::new(Tensor::new(vec![1.0f32, 2.0, 3.0])?, true);
    let b = Variable::new(Tensor::new(vec![4.0f32, 5.0, 6.0])?, true);
    let c = Variable::new(Tensor::new(vec![0.5f32])?, true);

    let d = a.add(&a.mul(&b)?)?.add(&b.mul(&c)?)?.sum()?;
    d.backward(None, true, false)?;

    println!("d: {}", d.data());
    for (name, v) in [("a", &a), ("b", &b), ("c", &c)] {
        if let Some(grad) = v.grad()? {
            println!("{}.grad: {}", name, grad.data());
        }
    }

    // a second pass over the kept graph starts from empty gradients unless
    // retention is requested
    let retain = ExecuteOptions::new().with_retain_grad(true);
    Engine::get_default_engine().execute(
        &[d.gradient_edge()?],
        vec![Variable::new(Tensor::ones_like(d.data())?, false)],
        false,
        false,
        &retain,
    )?;
    if let Some(grad) = a.grad()? {
        println!("a.grad after two retained passes: {}", grad.data());
    }

    let e = {
        let _guard = no_grad();
        a.mul_scalar(2.0)?
    };
    println!("e requires grad: {}", e.requires_grad());

    Ok(())
}
