//! Records and databases shared by the integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::db::SolarDb;
use crate::tables::{
    ExogenousRecord, ExogenousValues, MetaRecord, MetaValues, PowerRecord, PowerValues,
    WeatherRecord, WeatherValues,
};

pub async fn memory_db() -> SolarDb {
    SolarDb::connect("sqlite::memory:", true)
        .await
        .expect("in-memory database")
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid fixture time")
}

/// `count` timestamps spaced five minutes apart.
pub fn slots(start: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    (0..count)
        .map(|i| start + Duration::minutes(5 * i as i64))
        .collect()
}

pub fn power(pp_id: i64, inv_id: i64, dt: DateTime<Utc>, power_ac: i64) -> PowerRecord {
    PowerRecord {
        pp_id,
        inv_id,
        dt,
        values: PowerValues {
            power_ac: Some(power_ac),
            power_dc: Some(power_ac + 5),
            energy_hour: Some(power_ac / 12),
            energy_day: Some(power_ac),
            energy_week: Some(power_ac * 7),
            energy_month: Some(power_ac * 30),
            ipolated: Some(false),
            epolated: Some(false),
        },
    }
}

/// Weather sample issued `age` hours before `dt`.
pub fn weather(pp_id: i64, dt: DateTime<Utc>, age: i64, temp: f64) -> WeatherRecord {
    WeatherRecord {
        pp_id,
        dt,
        age,
        values: WeatherValues {
            src_dt: Some(dt - Duration::hours(age)),
            summary: Some("clear".to_string()),
            temp: Some(temp),
            ipolated: Some(false),
            epolated: Some(false),
            ..WeatherValues::default()
        },
    }
}

pub fn exogenous(pp_id: i64, dt: DateTime<Utc>, irradiance: f64) -> ExogenousRecord {
    ExogenousRecord {
        pp_id,
        dt,
        values: ExogenousValues {
            sun_altitude: Some(12.5),
            sun_azimuth: Some(180.0),
            sun_irradiance: Some(irradiance),
            status: Some(0),
            error: Some(0),
            clear: Some(irradiance * 1.1),
        },
    }
}

pub fn meta(pp_id: i64, inv_id: i64) -> MetaRecord {
    MetaRecord {
        pp_id,
        inv_id,
        values: MetaValues {
            freq: Some(5),
            capacity: Some(9.8),
            inverters: Some(2.0),
            interval: Some(at(2021, 1, 1, 0, 0)),
            location: Some("Brno".to_string()),
            pos_lat: Some(49.19),
            pos_long: Some(16.61),
        },
    }
}

/// Two plants: plant 1 with an aggregate and inverters 0 and 1, plant 2 as
/// aggregate only. Twelve power slots from midnight, hourly measured weather.
pub async fn seeded_db() -> SolarDb {
    let db = memory_db().await;
    let start = at(2021, 1, 1, 0, 0);

    let mut power_rows = Vec::new();
    for (i, dt) in slots(start, 12).into_iter().enumerate() {
        let value = 100 + 10 * i as i64;
        power_rows.push(power(1, -1, dt, value));
        power_rows.push(power(1, 0, dt, value / 2));
        power_rows.push(power(1, 1, dt, value / 2));
        power_rows.push(power(2, -1, dt, value * 3));
    }
    db.insert_power(&power_rows).await.expect("power fixture");

    let weather_rows = vec![
        weather(1, start, 0, 10.0),
        weather(1, start + Duration::hours(1), 0, 12.0),
        weather(2, start, 0, -2.0),
        weather(2, start + Duration::hours(1), 0, -1.0),
    ];
    db.insert_weather(&weather_rows).await.expect("weather fixture");

    let exogenous_rows: Vec<ExogenousRecord> = slots(start, 12)
        .into_iter()
        .enumerate()
        .map(|(i, dt)| exogenous(1, dt, 50.0 * i as f64))
        .collect();
    db.insert_exogenous(&exogenous_rows).await.expect("exogenous fixture");

    db.insert_meta(&[meta(1, -1), meta(1, 0), meta(1, 1), meta(2, -1)])
        .await
        .expect("meta fixture");
    db
}
