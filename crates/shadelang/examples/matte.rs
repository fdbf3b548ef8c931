//! Shade a small grid with the matte surface shader and one distant
//! light, then print the resulting colors.
//!
//!     cargo run -p shadelang --example matte

use shadelang::compile::compile;
use shadelang::grid::Grid;
use shadelang::math::Vec3;
use shadelang::render::SceneContext;
use shadelang::value::ValueType;
use shadelang::vm::{LightSource, VirtualMachine};
use shadelang::SymbolTable;

fn main() {
    env_logger::init();

    let table = SymbolTable::new();
    let matte = compile(include_str!("../shaders/matte.sl"), &table).expect("matte compiles");
    let distant =
        compile(include_str!("../shaders/distantlight.sl"), &table).expect("light compiles");

    let mut scene = SceneContext::new();
    scene.attributes.geometry_left_handed = false;
    scene.attributes.color = Vec3::new(0.8, 0.4, 0.2);

    let mut vm = VirtualMachine::new(&scene);
    let mut matte_parameters = Grid::new();
    vm.initialize(&mut matte_parameters, &matte);
    let mut light_parameters = Grid::new();
    vm.initialize(&mut light_parameters, &distant);

    // A tilted 4x4 patch.
    let size = 4;
    let mut grid = Grid::new();
    grid.resize(size, size);
    grid.du = 1.0 / size as f32;
    grid.dv = 1.0 / size as f32;
    let p = grid.add_value("P", ValueType::Point);
    {
        let mut p = p.borrow_mut();
        for (i, out) in p.vec3s_mut().iter_mut().enumerate() {
            let (x, y) = ((i % size) as f32, (i / size) as f32);
            *out = Vec3::new(x, y, 0.25 * x);
        }
    }

    vm.shade_surface(
        &mut grid,
        &matte_parameters,
        &matte,
        &[LightSource {
            shader: &distant,
            parameters: &light_parameters,
        }],
    );

    let ci = grid.find_value("Ci").unwrap();
    for (i, c) in ci.borrow().vec3s().iter().enumerate() {
        println!("vertex {i:2}: ({:.3}, {:.3}, {:.3})", c.x, c.y, c.z);
    }
}
