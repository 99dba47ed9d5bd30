#[cfg(test)]
mod query_tests {
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate, Timelike};

    use crate::error::ErrorKind;
    use crate::frame::IndexLevels;
    use crate::identity::{IdentityFilter, PlantIdentity};
    use crate::query::{AgeSelection, RangeQuery, WeatherQuery};
    use crate::tables::{PowerColumn, Table, WeatherColumn};
    use crate::tests::fixtures::{at, exogenous, memory_db, power, seeded_db, slots, weather};

    fn measured(query: RangeQuery<WeatherColumn>) -> WeatherQuery {
        WeatherQuery::new(query)
            .select(AgeSelection::FixedAge(0))
            .smooth(true)
    }

    #[tokio::test]
    async fn test_power_levels_follow_filter() {
        let db = seeded_db().await;

        let all = db.get_pp_power(&RangeQuery::default()).await.unwrap();
        assert_eq!(all.len(), 48);
        assert!(all.levels.plant && all.levels.inverter);

        let plant = db
            .get_pp_power(&RangeQuery::new(IdentityFilter::Plant(1)))
            .await
            .unwrap();
        assert_eq!(plant.len(), 36);
        assert!(!plant.levels.plant && plant.levels.inverter);

        let inverter = db
            .get_pp_power(&RangeQuery::new(PlantIdentity::inverter(1, 1)))
            .await
            .unwrap();
        assert_eq!(inverter.len(), 12);
        assert_eq!(inverter.levels, IndexLevels::TIME_ONLY);
        assert_eq!(inverter.rows[0].values.power_ac, Some(50));

        let aggregate = db
            .get_pp_power(&RangeQuery::new(PlantIdentity::whole_plant(1)).all_indices(true))
            .await
            .unwrap();
        assert_eq!(aggregate.len(), 12);
        assert!(aggregate.levels.has_identity());
        assert!(aggregate.rows.iter().all(|row| row.key.inverter == Some(-1)));
    }

    #[tokio::test]
    async fn test_power_range_is_inclusive() {
        let db = seeded_db().await;
        let query = RangeQuery::new(PlantIdentity::whole_plant(2)).between(at(2021, 1, 1, 0, 10), at(2021, 1, 1, 0, 20));
        let frame = db.get_pp_power(&query).await.unwrap();
        assert_eq!(
            frame.timestamps(),
            vec![at(2021, 1, 1, 0, 10), at(2021, 1, 1, 0, 15), at(2021, 1, 1, 0, 20)]
        );

        // A date end covers the whole day; the next day is excluded.
        db.insert_power(&[power(2, -1, at(2021, 1, 2, 0, 0), 1)]).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let frame = db
            .get_pp_power(&RangeQuery::new(PlantIdentity::whole_plant(2)).between(day, day))
            .await
            .unwrap();
        assert_eq!(frame.len(), 12);
    }

    #[tokio::test]
    async fn test_power_projection() {
        let db = seeded_db().await;
        let query = RangeQuery::new(PlantIdentity::whole_plant(1)).columns(vec![PowerColumn::PowerAc]);
        let frame = db.get_pp_power(&query).await.unwrap();
        assert_eq!(frame.header(), vec!["dt", "power_ac"]);
        assert_eq!(frame.column_f64(PowerColumn::PowerAc)[1], Some(110.0));
    }

    #[tokio::test]
    async fn test_weather_latest_before_keeps_freshest_admissible() {
        let db = memory_db().await;
        let dt = at(2021, 6, 1, 12, 0);
        let mut fixture = Vec::new();
        for (age, temp) in [(1, 1.0), (3, 3.0), (6, 6.0)] {
            fixture.push(weather(1, dt, age, temp));
        }
        db.insert_weather(&fixture).await.unwrap();

        let query = WeatherQuery::new(RangeQuery::new(IdentityFilter::Plant(1)))
            .select(AgeSelection::LatestBefore(at(2021, 6, 1, 10, 0)));
        let frame = db.get_pp_weather(&query).await.unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.rows[0].values.temp, Some(3.0));
        assert_eq!(frame.rows[0].key.age, Some(3));
        assert!(!frame.levels.age);
        assert!(!frame.levels.plant);
    }

    #[tokio::test]
    async fn test_weather_without_selection_keeps_every_age() {
        let db = memory_db().await;
        let dt = at(2021, 6, 1, 12, 0);
        db.insert_weather(&[weather(1, dt, 0, 20.0), weather(1, dt, 2, 18.0)])
            .await
            .unwrap();

        let frame = db.get_pp_weather(&WeatherQuery::default()).await.unwrap();
        assert_eq!(frame.len(), 2);
        assert!(frame.levels.plant && frame.levels.age);
        assert_eq!(frame.header()[..3], ["pp_id", "dt", "age"]);

        let fixed = WeatherQuery::new(RangeQuery::default()).select(AgeSelection::FixedAge(2));
        let frame = db.get_pp_weather(&fixed).await.unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.rows[0].values.temp, Some(18.0));
    }

    #[tokio::test]
    async fn test_smoothing_requires_selection() {
        let db = memory_db().await;
        let query = WeatherQuery::new(RangeQuery::default()).smooth(true);
        let err = db.get_pp_weather(&query).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_smoothed_weather_per_plant() {
        let db = seeded_db().await;
        let query = WeatherQuery::new(
            RangeQuery::default()
                .between(at(2021, 1, 1, 0, 0), at(2021, 1, 1, 1, 0))
                .columns(vec![WeatherColumn::Temp]),
        )
        .select(AgeSelection::FixedAge(0))
        .smooth(true);
        let frame = db.get_pp_weather(&query).await.unwrap();
        assert_eq!(frame.len(), 24);
        assert_eq!(frame.header(), vec!["pp_id", "dt", "temp"]);

        let plant2: Vec<f64> = frame
            .rows
            .iter()
            .filter(|row| row.key.plant == Some(2))
            .filter_map(|row| row.values.temp)
            .collect();
        assert_eq!(plant2.len(), 12);
        assert_relative_eq!(plant2[6], -1.5, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_hourly_weather_fills_every_five_minute_slot() {
        let db = memory_db().await;
        let hourly: Vec<_> = (1..=4)
            .map(|h| weather(1, at(2021, 1, 1, h, 0), 0, h as f64))
            .collect();
        db.insert_weather(&hourly).await.unwrap();

        let start = at(2021, 1, 1, 1, 0);
        let query = measured(
            RangeQuery::new(IdentityFilter::Plant(1)).between(start, at(2021, 1, 1, 4, 0)),
        );
        let frame = db.get_pp_weather(&query).await.unwrap();

        assert_eq!(frame.len(), 12 * 3);
        assert_eq!(frame.timestamps(), slots(start, 36));
        assert!(frame
            .rows
            .iter()
            .all(|row| row.key.dt.minute() % 5 == 0 && row.key.dt.second() == 0));
        for (i, row) in frame.rows.iter().enumerate() {
            assert_relative_eq!(row.values.temp.unwrap(), 1.0 + i as f64 / 12.0, epsilon = 1e-9);
        }
    }

    #[tokio::test]
    async fn test_smoothing_carries_categorical_columns_forward() {
        let db = memory_db().await;
        let mut rows = Vec::new();
        for (h, summary, ipolated, epolated) in
            [(0, "clear", false, false), (1, "rain", true, false), (2, "snow", false, true)]
        {
            let mut record = weather(1, at(2021, 1, 1, h, 0), 0, h as f64);
            record.values.summary = Some(summary.to_string());
            record.values.ipolated = Some(ipolated);
            record.values.epolated = Some(epolated);
            rows.push(record);
        }
        db.insert_weather(&rows).await.unwrap();

        let query = measured(
            RangeQuery::new(IdentityFilter::Plant(1))
                .between(at(2021, 1, 1, 0, 0), at(2021, 1, 1, 2, 30)),
        );
        let frame = db.get_pp_weather(&query).await.unwrap();
        assert_eq!(frame.len(), 30);

        for (i, row) in frame.rows.iter().enumerate() {
            let (summary, ipolated, epolated) = match i / 12 {
                0 => ("clear", false, false),
                1 => ("rain", true, false),
                _ => ("snow", false, true),
            };
            assert_eq!(row.values.summary.as_deref(), Some(summary), "slot {i}");
            assert_eq!(row.values.ipolated, Some(ipolated), "slot {i}");
            assert_eq!(row.values.epolated, Some(epolated), "slot {i}");
        }
        assert_relative_eq!(frame.rows[18].values.temp.unwrap(), 1.5, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_smoothing_over_date_window_covers_whole_day() {
        let db = memory_db().await;
        let day = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let mut hourly: Vec<_> = (0..24)
            .map(|h| weather(1, at(2021, 1, 1, h, 0), 0, h as f64))
            .collect();
        hourly.push(weather(1, at(2021, 1, 2, 0, 0), 0, 24.0));
        hourly.push(weather(1, at(2021, 1, 2, 6, 0), 0, 99.0));
        db.insert_weather(&hourly).await.unwrap();

        let query = measured(RangeQuery::new(IdentityFilter::Plant(1)).between(day, day));
        let frame = db.get_pp_weather(&query).await.unwrap();

        assert_eq!(frame.len(), 288);
        assert_eq!(frame.time_span(), Some((at(2021, 1, 1, 0, 0), at(2021, 1, 1, 23, 55))));
        // The last slot leans on the next midnight anchor fetched by hour widening.
        assert_relative_eq!(frame.rows[287].values.temp.unwrap(), 23.0 + 11.0 / 12.0, epsilon = 1e-9);
        assert!(frame.rows.iter().all(|row| row.values.temp.unwrap() < 24.0));
    }

    #[tokio::test]
    async fn test_unknown_status_code_is_rejected() {
        let db = memory_db().await;
        let mut record = exogenous(1, at(2021, 1, 1, 0, 0), 10.0);
        record.values.status = Some(42);
        let err = db.insert_exogenous(&[record]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataContract);
        assert_eq!(db.count_records(Table::Exogenous).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exogenous_levels() {
        let db = seeded_db().await;
        let frame = db
            .get_pp_exogenous(&RangeQuery::new(PlantIdentity::whole_plant(1)))
            .await
            .unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(frame.header()[0], "dt");

        let all = db.get_pp_exogenous(&RangeQuery::default()).await.unwrap();
        assert_eq!(all.header()[..2], ["pp_id", "dt"]);
    }

    #[tokio::test]
    async fn test_meta_queries() {
        let db = seeded_db().await;

        assert_eq!(db.count_records(Table::Power).await.unwrap(), 48);
        assert_eq!(db.count_records(Table::Meta).await.unwrap(), 4);

        assert_eq!(
            db.list_pp_inverters(None).await.unwrap(),
            vec![
                PlantIdentity::whole_plant(1),
                PlantIdentity::inverter(1, 0),
                PlantIdentity::inverter(1, 1),
                PlantIdentity::whole_plant(2),
            ]
        );
        assert_eq!(db.list_pp_inverters(Some(2)).await.unwrap().len(), 1);

        assert!(db.pp_exists(PlantIdentity::inverter(1, 0)).await.unwrap());
        assert!(!db.pp_exists(PlantIdentity::inverter(2, 0)).await.unwrap());
        assert!(!db.pp_exists(PlantIdentity::whole_plant(3)).await.unwrap());

        let info = db
            .get_pp_info(IdentityFilter::Exact(PlantIdentity::whole_plant(1)))
            .await
            .unwrap();
        assert_eq!(info.len(), 3);
        assert_eq!(info[0].values.location.as_deref(), Some("Brno"));

        let first = at(2021, 1, 1, 0, 0);
        assert_eq!(
            db.get_pp_interval(PlantIdentity::inverter(1, 1)).await.unwrap(),
            Some((first, first + Duration::minutes(55)))
        );
        assert_eq!(db.get_pp_interval(PlantIdentity::whole_plant(3)).await.unwrap(), None);
    }
}
