use pipeline::DeviceRegistry;

use crate::config::CheckArgs;
use crate::error::ServerError;

/// Resolve the configuration the way `serve` would and print what would be
/// used. Nothing is contacted.
pub fn run(args: CheckArgs) -> Result<(), ServerError> {
    let config = args.config.resolve()?;
    let registry = DeviceRegistry::load(&config.devices)?;

    let mqtt = &config.mqtt;
    println!("mqtt:      {}:{} tls={} topic={} qos={}", mqtt.host, mqtt.port, mqtt.tls, mqtt.topic, mqtt.qos);
    println!("prefix:    {} segment(s)", config.router().prefix_segments());
    println!("influxdb:  {} org={}", config.influxdb.url, config.influxdb.org);
    println!(
        "buckets:   dataseries={} aggregate={} event={}",
        config.buckets.dataseries, config.buckets.aggregate, config.buckets.event
    );
    println!("devices:   {} from {}", registry.len(), config.devices);
    for id in registry.device_ids() {
        if let Some(meta) = registry.get(id) {
            println!("  {id}: {} ({}, {})", meta.location_name, meta.location_lat, meta.location_lon);
        }
    }
    println!("config OK");
    Ok(())
}
