// @generated manually, mirroring the shape `diesel print-schema` would emit.

diesel::table! {
    use crate::sqlite_mapping::*;

    images (id) {
        id -> Integer,
        uuid -> Text,
        repository -> Text,
        filename -> Text,
        filesize -> Integer,
        purpose -> Integer,
        width -> Integer,
        height -> Integer,
        bitdepth -> Integer,
        pixeltype -> Text,
        ccd_temperature -> Nullable<Double>,
        bayer_pattern -> Nullable<Text>,
        captured_at -> Text,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    metadata (id) {
        id -> Integer,
        image_id -> Integer,
        key -> Text,
        value_kind -> Integer,
        value_str -> Nullable<Text>,
        value_int -> Nullable<BigInt>,
        value_float -> Nullable<Double>,
        comment -> Nullable<Text>,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    tasks (id) {
        id -> Integer,
        instrument -> Text,
        devices_json -> Text,
        exposure_json -> Text,
        desired_temperature -> Nullable<Double>,
        filter -> Nullable<Integer>,
        output_repository -> Text,
        purpose -> Integer,
        state -> Text,
        state_detail -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    calibrations (id) {
        id -> Integer,
        instrument -> Text,
        coefficients_json -> Text,
        determinant -> Double,
        created_at -> Text,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    calibration_points (id) {
        id -> Integer,
        calibration_id -> Integer,
        elapsed_ms -> BigInt,
        commanded_ra -> Double,
        commanded_dec -> Double,
        observed_ra -> Double,
        observed_dec -> Double,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    tracking_runs (id) {
        id -> Integer,
        instrument -> Text,
        control_type -> Text,
        started_at -> Text,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    tracking_points (id) {
        id -> Integer,
        run_id -> Integer,
        at -> Text,
        offset_x -> Double,
        offset_y -> Double,
        correction_ra -> Double,
        correction_dec -> Double,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    instruments (id) {
        id -> Integer,
        name -> Text,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    instrument_components (id) {
        id -> Integer,
        instrument_id -> Integer,
        role -> Text,
        device_name -> Text,
    }
}

diesel::table! {
    use crate::sqlite_mapping::*;

    global_config (id) {
        id -> Integer,
        domain -> Text,
        section -> Text,
        name -> Text,
        value -> Text,
    }
}

diesel::joinable!(metadata -> images (image_id));
diesel::joinable!(calibration_points -> calibrations (calibration_id));
diesel::joinable!(tracking_points -> tracking_runs (run_id));
diesel::joinable!(instrument_components -> instruments (instrument_id));

diesel::allow_tables_to_appear_in_same_query!(
    images,
    metadata,
    tasks,
    calibrations,
    calibration_points,
    tracking_runs,
    tracking_points,
    instruments,
    instrument_components,
    global_config,
);
