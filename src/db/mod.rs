pub mod dbsession;
