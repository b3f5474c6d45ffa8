fn main() {
    println!("cargo:rerun-if-changed=sdkconfig.defaults");

    // Only the device build needs the ESP-IDF environment; host test builds
    // compile without embuild.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
