mod merge_case1;
mod round_trip_case1;
