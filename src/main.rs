use clap::Parser;

use sureweave::ui::{self, Args};

fn main() {
    let args = Args::parse();
    ui::init_logging(args.verbose);
    if let Err(e) = ui::run(args) {
        eprintln!("sureweave: {e:?}");
        std::process::exit(1);
    }
}
