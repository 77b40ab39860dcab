fn main() {
    println!("cargo:rerun-if-env-changed=HIDROMETRO_WIFI_SSID");
    println!("cargo:rerun-if-env-changed=HIDROMETRO_WIFI_PASSWORD");
    println!("cargo:rerun-if-env-changed=HIDROMETRO_MQTT_HOST");
    println!("cargo:rerun-if-env-changed=HIDROMETRO_MQTT_PORT");
    println!("cargo:rerun-if-env-changed=HIDROMETRO_BASE_TOPIC");

    // Host builds (tests, fuzzing) have no ESP-IDF environment to export.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
