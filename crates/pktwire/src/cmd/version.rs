use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("pktwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: pktwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "build_target: {}",
        option_env!("PKTWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "max_packet_size: {}",
        pktwire_frame::DEFAULT_MAX_PACKET_SIZE
    );
    println!("header_size: {}", pktwire_frame::HEADER_SIZE);

    Ok(SUCCESS)
}
