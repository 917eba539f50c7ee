#[allow(unused_imports)]
use std::env;
use std::path::PathBuf;

#[allow(dead_code)]
/// Check for common RTC6 installation paths
fn find_rtc6_lib() -> Option<PathBuf> {
    let candidates = [
        "/opt/scanlab/rtc6/lib",
        "/usr/local/lib",
        "/usr/lib/x86_64-linux-gnu",
    ];

    for path in &candidates {
        let p = PathBuf::from(path);
        if p.join("libRTC6.so").exists() || p.join("RTC6DLLx64.lib").exists() {
            return Some(p);
        }
    }
    None
}

fn main() {
    // Linking only happens with the `rtc6-sdk` feature so the crate builds
    // on machines without the vendor SDK.
    #[cfg(feature = "rtc6-sdk")]
    {
        println!("cargo:rerun-if-env-changed=RTC6_SDK_DIR");
        println!("cargo:rerun-if-env-changed=RTC6_LIB_NAME");

        let lib_dir = match env::var("RTC6_SDK_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => match find_rtc6_lib() {
                Some(found) => {
                    println!(
                        "cargo:warning=RTC6_SDK_DIR not set, auto-detected: {}",
                        found.display()
                    );
                    found
                }
                None => {
                    eprintln!("RTC6_SDK_DIR: {:?}", env::var("RTC6_SDK_DIR").ok());
                    eprintln!("LD_LIBRARY_PATH: {:?}", env::var("LD_LIBRARY_PATH").ok());
                    panic!("RTC6_SDK_DIR environment variable must be set when `rtc6-sdk` feature is enabled.");
                }
            },
        };

        let lib_name = env::var("RTC6_LIB_NAME").unwrap_or_else(|_| {
            if cfg!(target_os = "windows") {
                "RTC6DLLx64".to_string()
            } else {
                "RTC6".to_string()
            }
        });

        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        println!("cargo:rustc-link-lib=dylib={}", lib_name);
    }
}
