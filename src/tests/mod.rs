#[cfg(test)]
pub mod topology_tests;



#[cfg(test)]
pub mod traffic_tests;

#[cfg(test)]
pub mod sweep_tests;
