//! Light a plane with the spotlight shader and show the cone falloff.
//!
//!     cargo run -p shadelang --example spotlight

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
    let lambert = compile(
        "surface lambert() { illuminance( P ) { Ci += Cl; } Oi = Os; }",
        &table,
    )
    .expect("surface compiles");
    let spot =
        compile(include_str!("../shaders/spotlight.sl"), &table).expect("spotlight compiles");

    let scene = SceneContext::new();
    let mut vm = VirtualMachine::new(&scene);
    let mut surface_parameters = Grid::new();
    vm.initialize(&mut surface_parameters, &lambert);
    let mut light_parameters = Grid::new();
    vm.initialize(&mut light_parameters, &spot);

    // A plane one unit down the spotlight's axis; vertices near the
    // center are inside the cone, the corners fall outside.
    let size = 8;
    let mut grid = Grid::new();
    grid.resize(size, size);
    let p = grid.add_value("P", ValueType::Point);
    {
        let mut p = p.borrow_mut();
        for (i, out) in p.vec3s_mut().iter_mut().enumerate() {
            let x = (i % size) as f32 / (size - 1) as f32 - 0.5;
            let y = (i / size) as f32 / (size - 1) as f32 - 0.5;
            *out = Vec3::new(x, y, 1.0);
        }
    }

    vm.shade_surface(
        &mut grid,
        &surface_parameters,
        &lambert,
        &[LightSource {
            shader: &spot,
            parameters: &light_parameters,
        }],
    );

    let ci = grid.find_value("Ci").unwrap();
    let ci = ci.borrow();
    for y in 0..size {
        let row: String = (0..size)
            .map(|x| {
                let intensity = ci.vec3s()[y * size + x].x;
                match intensity {
                    i if i > 0.75 => '#',
                    i if i > 0.4 => '+',
                    i if i > 0.1 => '.',
                    _ => ' ',
                }
            })
            .collect();
        println!("{row}");
    }
}
