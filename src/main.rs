// Copyright 2020 TwoCookingMice

use std::env;
use std::path::Path;
use std::process;

use env_logger::Env;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <scene.json>", args[0]);
        process::exit(2);
    }

    match luminary::render_scene(Path::new(&args[1])) {
        Ok(report) => {
            if report.non_finite_pixels > 0 {
                log::warn!("{} pixels were replaced by the non-finite sentinel", report.non_finite_pixels);
            }
        }
        Err(err) => {
            eprintln!("error: {}", err.report());
            process::exit(1);
        }
    }
}
