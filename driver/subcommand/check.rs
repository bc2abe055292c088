use std::path;

use super::load_program;

pub fn check_input_file(input_path: &path::Path) -> bool {
    match load_program(input_path) {
        Some(program) => {
            log::debug!("{:?}", program);
            println!(
                "{}: {} instructions, {} modules, {} globals",
                input_path.display(),
                program.code().len(),
                program.modules().len(),
                program.global_count()
            );
            true
        }
        None => false,
    }
}
